//! Where a resource lives, before and after DFS redirection

use crate::config::DEFAULT_PORT;
use crate::dfs::{full_path, DfsReferral};
use crate::error::{Error, Result};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
struct DfsTarget {
    server: String,
    share: String,
    path: String,
}

/// `\\server\share\path` plus port, tracking where DFS sent it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLocator {
    server: String,
    share: Option<String>,
    path: String,
    port: u16,
    dfs: Option<DfsTarget>,
}

impl ResourceLocator {
    pub fn new(server: impl Into<String>, share: Option<&str>, path: &str) -> Self {
        Self {
            server: server.into(),
            share: share.filter(|s| !s.is_empty()).map(str::to_string),
            path: normalize_path(path),
            port: DEFAULT_PORT,
            dfs: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = if port == 0 { DEFAULT_PORT } else { port };
        self
    }

    /// Parse `\\server\share\path` or `smb://server[:port]/share/path`
    pub fn parse(location: &str) -> Result<Self> {
        let (authority, rest) = if let Some(url) = location.strip_prefix("smb://") {
            match url.split_once('/') {
                Some((authority, rest)) => (authority, rest.replace('/', "\\")),
                None => (url, String::new()),
            }
        } else if let Some(unc) = location.strip_prefix("\\\\") {
            match unc.split_once('\\') {
                Some((authority, rest)) => (authority, rest.to_string()),
                None => (unc, String::new()),
            }
        } else {
            return Err(Error::InvalidParameter(format!(
                "Not an SMB location: {}",
                location
            )));
        };

        let (server, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    Error::InvalidParameter(format!("Invalid port in {}", location))
                })?;
                (host, port)
            }
            None => (authority, DEFAULT_PORT),
        };
        if server.is_empty() {
            return Err(Error::InvalidParameter(format!(
                "Missing server in {}",
                location
            )));
        }

        let (share, path) = match rest.split_once('\\') {
            Some((share, path)) => (share, path),
            None => (rest.as_str(), ""),
        };
        Ok(Self::new(server, Some(share), path).with_port(port))
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn share(&self) -> Option<&str> {
        self.share.as_deref()
    }

    /// Share-relative path, empty for the share root
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_ipc(&self) -> bool {
        self.share_with_dfs()
            .map_or(true, |share| share.eq_ignore_ascii_case("IPC$"))
    }

    /// Server to connect to, after DFS redirection
    pub fn server_with_dfs(&self) -> &str {
        self.dfs.as_ref().map_or(&self.server, |t| &t.server)
    }

    pub fn share_with_dfs(&self) -> Option<&str> {
        match &self.dfs {
            Some(target) => Some(&target.share),
            None => self.share(),
        }
    }

    pub fn path_with_dfs(&self) -> &str {
        self.dfs.as_ref().map_or(&self.path, |t| &t.path)
    }

    /// `\server\share\path` as requested, the key DFS referrals consume
    pub fn full_path(&self) -> String {
        full_path(&self.server, self.share().unwrap_or("IPC$"), &self.path)
    }

    pub fn is_dfs_redirected(&self) -> bool {
        self.dfs.is_some()
    }

    /// Follow `referral` for the requested location
    pub fn set_dfs_referral(&mut self, referral: &DfsReferral) {
        let path = referral.resolve_path(&self.full_path());
        self.dfs = Some(DfsTarget {
            server: referral.server.clone(),
            share: referral.share.clone(),
            path: if path == "\\" { String::new() } else { path },
        });
    }

    pub fn clear_dfs_referral(&mut self) {
        self.dfs = None;
    }
}

fn normalize_path(path: &str) -> String {
    let path = path.replace('/', "\\");
    let trimmed = path.trim_matches('\\');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\\{}", trimmed)
    }
}

impl fmt::Display for ResourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\\\\{}", self.server)?;
        if let Some(share) = &self.share {
            write!(f, "\\{}{}", share, self.path)?;
        }
        Ok(())
    }
}
