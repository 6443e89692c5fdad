//! Connection options and backend URLs
//!
//! `resolve` is pure: it builds the URL an engine will be opened with but
//! never connects. Omitted fields stay unset; no ports or hosts are
//! defaulted here.

use super::types::{Driver, UrlStyle};
use crate::error::{Error, Result};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::BTreeMap;
use std::fmt;

/// Query key carrying an ODBC connect string
const ODBC_CONNECT: &str = "odbc_connect";

/// Credentials keep only RFC 3986 unreserved characters unescaped
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

// ============================================================================
// Connect Options
// ============================================================================

/// Everything a caller can say about the database it wants
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Driver kind (`sqlite`, `mysql`, `postgresql`, `duckdb`, `mssql`, `mariadb`)
    pub driver: String,
    /// Database name, or file path for embedded drivers
    pub database: Option<String>,
    /// ODBC data source name; takes precedence over discrete fields
    pub dsn: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Extra URL query parameters
    pub query: BTreeMap<String, String>,
    /// Complete connection string; takes precedence over everything else
    pub url: Option<String>,
}

impl ConnectOptions {
    /// Options for a driver kind, given as a `Driver` or its name
    pub fn new(driver: impl ToString) -> Self {
        Self {
            driver: driver.to_string(),
            ..Self::default()
        }
    }

    /// Options for a complete connection string such as `postgresql://u:p@host/db`
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn dsn(mut self, dsn: impl Into<String>) -> Self {
        self.dsn = Some(dsn.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Add a URL query parameter
    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Backend URL
// ============================================================================

/// A resolved backend URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendUrl {
    driver: Driver,
    scheme: String,
    username: Option<String>,
    password: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    query: BTreeMap<String, String>,
}

impl BackendUrl {
    /// Structured URL from discrete fields
    pub fn structured(driver: Driver, options: &ConnectOptions) -> Self {
        Self {
            driver,
            scheme: driver.strategy().scheme.to_string(),
            username: options.username.clone(),
            password: options.password.clone(),
            host: options.host.clone(),
            port: options.port,
            database: options.database.clone(),
            query: options.query.clone(),
        }
    }

    /// ODBC-style URL for a data source name
    pub fn odbc(driver: Driver, dsn: &str) -> Self {
        let mut query = BTreeMap::new();
        query.insert(ODBC_CONNECT.to_string(), format!("DSN={dsn}"));
        Self {
            driver,
            scheme: driver.strategy().odbc_scheme.to_string(),
            username: None,
            password: None,
            host: None,
            port: None,
            database: None,
            query,
        }
    }

    /// Parse a complete connection string
    ///
    /// The driver is taken from the scheme, so `mysql+pymysql://…` is a
    /// MySQL URL. File drivers keep SQLAlchemy's convention: `sqlite:///app.db`
    /// is relative, `sqlite:////tmp/app.db` is absolute.
    pub fn parse(input: &str) -> Result<Self> {
        let parsed = url::Url::parse(input)
            .map_err(|e| Error::connect_failed(redact(input), format!("malformed URL: {e}")))?;

        let scheme = parsed.scheme().to_string();
        let driver = Driver::from_scheme(&scheme)?;

        let username = Some(unescape(parsed.username())).filter(|u| !u.is_empty());
        let password = parsed.password().map(unescape);
        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .map(ToString::to_string);

        let path = parsed.path();
        let database = Some(unescape(path.strip_prefix('/').unwrap_or(path)))
            .filter(|d| !d.is_empty());

        let query = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        Ok(Self {
            driver,
            scheme,
            username,
            password,
            host,
            port: parsed.port(),
            database,
            query,
        })
    }

    pub fn driver(&self) -> Driver {
        self.driver
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    /// ODBC connect string, if this URL was built from a DSN
    pub fn odbc_connect(&self) -> Option<&str> {
        self.query.get(ODBC_CONNECT).map(String::as_str)
    }

    /// Whether an embedded database lives only in memory
    pub fn is_memory(&self) -> bool {
        self.driver.strategy().style == UrlStyle::File
            && self
                .database
                .as_deref()
                .map_or(true, |db| db.is_empty() || db == ":memory:")
    }

    /// URL with the password replaced, for logs and error messages
    pub fn masked(&self) -> String {
        self.render(true)
    }

    fn render(&self, mask_password: bool) -> String {
        let mut out = format!("{}://", self.scheme);

        if let Some(user) = &self.username {
            out.push_str(&escape(user));
            if let Some(password) = &self.password {
                out.push(':');
                if mask_password {
                    out.push_str("****");
                } else {
                    out.push_str(&escape(password));
                }
            }
            out.push('@');
        }

        if let Some(host) = &self.host {
            out.push_str(host);
        }
        if let Some(port) = self.port {
            out.push_str(&format!(":{port}"));
        }

        if let Some(database) = &self.database {
            out.push('/');
            out.push_str(database);
        }

        if !self.query.is_empty() {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&self.query)
                .finish();
            out.push('?');
            out.push_str(&query);
        }

        out
    }
}

impl fmt::Display for BackendUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolve options into a driver and backend URL
///
/// Precedence: a complete connection string, then a DSN, then discrete
/// fields. Unknown driver kinds fail with `UnsupportedDriver`.
pub fn resolve(options: &ConnectOptions) -> Result<(Driver, BackendUrl)> {
    if let Some(url) = &options.url {
        let url = BackendUrl::parse(url)?;
        return Ok((url.driver(), url));
    }

    let driver: Driver = options.driver.parse()?;

    let url = match &options.dsn {
        Some(dsn) => BackendUrl::odbc(driver, dsn),
        None => BackendUrl::structured(driver, options),
    };

    Ok((driver, url))
}

fn escape(input: &str) -> String {
    utf8_percent_encode(input, USERINFO).to_string()
}

fn unescape(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}

/// Drop everything between `://` and `@` so bad URLs never leak passwords
fn redact(input: &str) -> String {
    match (input.find("://"), input.rfind('@')) {
        (Some(start), Some(at)) if at > start => {
            format!("{}****{}", &input[..start + 3], &input[at..])
        }
        _ => input.to_string(),
    }
}
