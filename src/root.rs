use crate::CvsError;

/// Default TCP port of a CVS pserver.
pub const DEFAULT_PSERVER_PORT: u16 = 2401;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
/// A parsed `:pserver:` CVSROOT.
///
/// Accepted form: `:pserver:[user[:password]@]host[:[port]]/path`. Both the
/// classic `host:/path` spelling and `host:port/path` are accepted.
pub struct CvsRoot {
    /// Login name, if present in the root.
    pub user: Option<String>,
    /// Plaintext password, if present in the root (CVS 1.12 extension).
    pub password: Option<String>,
    /// Hostname (or IP) of the pserver.
    pub host: String,
    /// TCP port, defaulting to [`DEFAULT_PSERVER_PORT`].
    pub port: u16,
    /// Repository path on the server (the value sent as `Root`).
    pub path: String,
}

impl CvsRoot {
    /// Parses a `:pserver:` CVSROOT string.
    ///
    /// # Examples
    ///
    /// ```
    /// # use cvs::CvsRoot;
    /// let root = CvsRoot::parse(":pserver:anonymous@cvs.example.org:/cvsroot/demo").unwrap();
    /// assert_eq!(root.host, "cvs.example.org");
    /// assert_eq!(root.port, 2401);
    /// assert_eq!(root.path, "/cvsroot/demo");
    /// ```
    pub fn parse(input: &str) -> Result<Self, CvsError> {
        let input = input.trim();
        const METHOD: &str = ":pserver:";
        if !input
            .get(..METHOD.len())
            .is_some_and(|method| method.eq_ignore_ascii_case(METHOD))
        {
            return Err(CvsError::InvalidRoot(format!(
                "only :pserver: roots are supported: {input}"
            )));
        }
        let rest = input.get(METHOD.len()..).unwrap_or_default();

        let (userinfo, hostpath) = match rest.rsplit_once('@') {
            Some((userinfo, hostpath)) => (Some(userinfo), hostpath),
            None => (None, rest),
        };
        let (user, password) = match userinfo {
            Some(info) => {
                let (user, password) = match info.split_once(':') {
                    Some((user, password)) => (user, Some(password.to_string())),
                    None => (info, None),
                };
                if user.trim().is_empty() {
                    return Err(CvsError::InvalidRoot(format!("empty user in root: {input}")));
                }
                (Some(user.to_string()), password)
            }
            None => (None, None),
        };

        let Some(slash) = hostpath.find('/') else {
            return Err(CvsError::InvalidRoot(format!(
                "missing repository path in root: {input}"
            )));
        };
        let (hostport, path) = hostpath.split_at(slash);
        let hostport = hostport.strip_suffix(':').unwrap_or(hostport);

        let (host, port_str) = match hostport.strip_prefix('[') {
            Some(bracketed) => {
                let Some((host, rest)) = bracketed.split_once(']') else {
                    return Err(CvsError::InvalidRoot(format!("unclosed '[' in root: {input}")));
                };
                let port_str = match rest {
                    "" => None,
                    rest => Some(rest.strip_prefix(':').ok_or_else(|| {
                        CvsError::InvalidRoot(format!("invalid host in root: {input}"))
                    })?),
                };
                (host, port_str)
            }
            None => match hostport.split_once(':') {
                Some((host, port_str)) => (host, Some(port_str)),
                None => (hostport, None),
            },
        };
        let port = match port_str {
            Some(port_str) => port_str
                .parse::<u16>()
                .map_err(|_| CvsError::InvalidRoot(format!("invalid port in root: {input}")))?,
            None => DEFAULT_PSERVER_PORT,
        };
        if host.trim().is_empty() {
            return Err(CvsError::InvalidRoot(format!("missing host in root: {input}")));
        }

        Ok(Self {
            user,
            password,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// Returns the login name, or `anonymous` when the root carries none.
    pub fn user_or_anonymous(&self) -> &str {
        self.user.as_deref().unwrap_or("anonymous")
    }
}

impl std::fmt::Display for CvsRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(":pserver:")?;
        if let Some(user) = self.user.as_deref() {
            write!(f, "{user}@")?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]:{}{}", self.host, self.port, self.path)
        } else {
            write!(f, "{}:{}{}", self.host, self.port, self.path)
        }
    }
}

impl std::str::FromStr for CvsRoot {
    type Err = CvsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
