//! mDNS service advertisement
//!
//! Advertises EchoNet as `_echonet._tcp.local.` so targets and inspection
//! tools can find microphone instances on the local network.
//!
//! TXT records:
//! - `version`: crate version
//! - `type`: always "microphone"
//! - `zone` / `subzone`: deployment labels from config
//! - `capabilities`: comma-separated feature list

use std::collections::HashMap;
use std::sync::Mutex;

use mdns_sd::{ServiceDaemon, ServiceInfo};

use crate::config::DiscoveryConfig;
use crate::{Error, Result};

/// mDNS service type for EchoNet instances
pub const SERVICE_TYPE: &str = "_echonet._tcp.local.";

/// mDNS advertiser for EchoNet discovery
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    registered: Mutex<Option<String>>,
}

impl MdnsAdvertiser {
    /// Create the advertiser
    ///
    /// # Errors
    ///
    /// Returns error if the mDNS daemon cannot be created
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| Error::Config(format!("failed to create mDNS daemon: {e}")))?;

        Ok(Self {
            daemon,
            registered: Mutex::new(None),
        })
    }

    /// Start advertising this instance
    ///
    /// # Errors
    ///
    /// Returns error if the service cannot be registered
    pub fn start(&self, config: &DiscoveryConfig, port: u16) -> Result<()> {
        let hostname = hostname::get().map_or_else(
            |_| "echonet".to_string(),
            |h| h.to_string_lossy().to_string(),
        );

        let mut properties = HashMap::new();
        properties.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());
        properties.insert("type".to_string(), "microphone".to_string());
        properties.insert("zone".to_string(), config.zone.clone());
        properties.insert("subzone".to_string(), config.subzone.clone());
        properties.insert(
            "capabilities".to_string(),
            "asr,routing,sessions,state".to_string(),
        );

        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &config.instance_name,
            &format!("{hostname}.local."),
            "",
            port,
            properties,
        )
        .map_err(|e| Error::Config(format!("failed to create service info: {e}")))?
        .enable_addr_auto();

        let fullname = service.get_fullname().to_string();
        self.daemon
            .register(service)
            .map_err(|e| Error::Config(format!("failed to register mDNS service: {e}")))?;

        if let Ok(mut registered) = self.registered.lock() {
            *registered = Some(fullname);
        }

        tracing::info!(
            service_type = SERVICE_TYPE,
            instance = %config.instance_name,
            port,
            zone = %config.zone,
            "mDNS service registered"
        );
        Ok(())
    }

    /// Stop advertising
    pub fn stop(&self) {
        let fullname = self
            .registered
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());

        if let Some(name) = fullname {
            if let Err(e) = self.daemon.unregister(&name) {
                tracing::warn!(error = %e, "failed to unregister mDNS service");
            } else {
                tracing::info!("mDNS service unregistered");
            }
        }
    }

    /// Whether a registration is active
    pub fn is_advertising(&self) -> bool {
        self.registered
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

impl Drop for MdnsAdvertiser {
    fn drop(&mut self) {
        self.stop();
        if let Err(e) = self.daemon.shutdown() {
            tracing::trace!(error = %e, "mDNS daemon shutdown error (expected on normal exit)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type_format() {
        assert!(SERVICE_TYPE.ends_with(".local."));
        assert!(SERVICE_TYPE.starts_with('_'));
        assert!(SERVICE_TYPE.contains("._tcp."));
    }

    #[test]
    fn test_advertiser_creation() {
        // mDNS may be unavailable in CI; only assert when it comes up
        if let Ok(advertiser) = MdnsAdvertiser::new() {
            assert!(!advertiser.is_advertising());
        }
    }
}
