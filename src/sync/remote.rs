use std::path::Path;

/// Where and how to fetch a mirrored repository from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSpec {
    url: String,
    cors_proxy: Option<String>,
    depth: u32,
}

impl RemoteSpec {
    pub fn new(url: impl Into<String>) -> Self {
        RemoteSpec {
            url: url.into(),
            cors_proxy: None,
            depth: 1,
        }
    }

    /// Route HTTP(S) fetches through a CORS relay base URL
    pub fn with_cors_proxy(mut self, cors_proxy: Option<String>) -> Self {
        self.cors_proxy = cors_proxy.filter(|url| !url.trim().is_empty());
        self
    }

    /// Shallow depth for fetches; 0 fetches full history
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// The repository identity
    pub fn url(&self) -> &str {
        &self.url
    }

    /// True for remotes reached through libgit2's local transport
    pub fn is_local(&self) -> bool {
        self.url.starts_with("file://")
            || (!self.url.contains("://") && Path::new(&self.url).exists())
    }

    /// URL actually handed to the transport.
    ///
    /// A relay receives the remote URL without its scheme appended to the
    /// relay base: `https://host/repo.git` via `https://relay` becomes
    /// `https://relay/host/repo.git`.
    pub fn fetch_url(&self) -> String {
        let proxy = match &self.cors_proxy {
            Some(proxy) if !self.is_local() => proxy,
            _ => return self.url.clone(),
        };
        let stripped = self
            .url
            .strip_prefix("https://")
            .or_else(|| self.url.strip_prefix("http://"));
        match stripped {
            Some(rest) => format!("{}/{}", proxy.trim_end_matches('/'), rest),
            None => self.url.clone(),
        }
    }

    /// Depth to request, if the fetch should be shallow
    pub fn shallow_depth(&self) -> Option<u32> {
        if self.depth == 0 {
            return None;
        }
        if self.is_local() {
            // libgit2's local transport rejects shallow negotiation.
            tracing::debug!("Fetching full history from local remote {}", self.url);
            return None;
        }
        Some(self.depth)
    }
}
