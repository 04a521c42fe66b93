use crate::streaming::ConsumerOptions;

/// Server-level settings shared by every controller.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Service label attached to every operation span.
    pub service_name: String,
    /// Retry and idle-timeout settings for model streams.
    pub stream: ConsumerOptions,
    /// Close a WebSocket after its first handled message.
    ///
    /// With `false` a socket keeps serving messages, each one seeing the
    /// number of previously handled messages as its quantity.
    pub ws_close_after_response: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            service_name: "docintake".to_string(),
            stream: ConsumerOptions::default(),
            ws_close_after_response: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn defaults_are_one_shot() {
        let config = ServerConfig::default();
        assert_eq!(config.service_name, "docintake");
        assert!(config.ws_close_after_response);
        assert_eq!(config.stream.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.stream.retry.max_retries, 5);
    }
}
