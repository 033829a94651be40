use anyhow::Context;
use std::fmt;

/// Names a logical group of backends, e.g. `foo.srv.example.com`.
///
/// The name is queried as-is for SRV records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Service(String);

impl Service {
    /// Create a [`Service`] from a valid domain name.
    ///
    /// This function will fail if `name` is empty or not a valid domain name.
    pub fn from_name<T: ToString>(name: T) -> Result<Self, anyhow::Error> {
        let name = name.to_string();

        if name.is_empty() {
            anyhow::bail!("service name must not be empty");
        }

        hickory_resolver::Name::from_ascii(&name)
            .map_err(anyhow::Error::from)
            .context("invalid service name")?;

        Ok(Self(name))
    }

    /// Get the name of the service.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ```
/// let service = wizbal::Service::try_from("foo.srv.example.com").unwrap();
/// assert_eq!(service.as_str(), "foo.srv.example.com");
/// ```
impl TryFrom<&str> for Service {
    type Error = anyhow::Error;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        Self::from_name(name)
    }
}

/// ```
/// let service = wizbal::Service::try_from(String::from("foo.srv.example.com")).unwrap();
/// assert_eq!(service.as_str(), "foo.srv.example.com");
/// ```
impl TryFrom<String> for Service {
    type Error = anyhow::Error;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::from_name(name)
    }
}

/// One upstream instance of a [`Service`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Backend {
    host: String,
    port: u16,
}

impl Backend {
    pub fn new<T: Into<String>>(host: T, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The root url the liveness probe is sent to.
    ///
    /// ```
    /// let backend = wizbal::Backend::new("h1.example.com", 8080);
    /// assert_eq!(backend.url(), "http://h1.example.com:8080/");
    /// ```
    pub fn url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
