use anyhow::Context;
use url::Url;

/// URL builders for the signage backend, rooted at the configured server URL.
///
/// Device codes and command ids are pushed as single path segments, so `/`,
/// `?` and `#` inside them are percent-encoded rather than changing the route.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    /// Build endpoints for `base_url`.
    ///
    /// Only `http` and `https` are accepted. Any query or fragment on the base
    /// is dropped; a trailing slash is ignored.
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let mut base = Url::parse(base_url.trim())
            .with_context(|| format!("Invalid server URL '{}'", base_url))?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            anyhow::bail!("Server URL '{}' must start with http:// or https://", base_url);
        }
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self { base })
    }

    fn join(&self, segments: &[&str]) -> String {
        let mut url = self.base.clone();
        // Only fails for cannot-be-a-base URLs, rejected in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.into()
    }

    pub fn health(&self) -> String {
        self.join(&["health"])
    }

    pub fn heartbeat(&self) -> String {
        self.join(&["devices", "heartbeat"])
    }

    pub fn playlist(&self, device_code: &str) -> String {
        self.join(&["devices", device_code, "playlist"])
    }

    pub fn confirm_sync(&self, device_code: &str) -> String {
        self.join(&["devices", device_code, "sync", "confirm"])
    }

    pub fn command_result(&self, device_code: &str, command_id: &str) -> String {
        self.join(&["devices", device_code, "commands", command_id, "result"])
    }

    pub fn logs(&self, device_code: &str) -> String {
        self.join(&["devices", device_code, "logs"])
    }
}
