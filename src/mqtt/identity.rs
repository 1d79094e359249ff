use super::transport::IdentityBootstrap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Guest-access identity shared between the bootstrap and the MQTT transport.
///
/// `configure` records the identity pool id; the transport presents it as the MQTT
/// username on the next connect.
///
/// This is a placeholder, not Cognito guest access. It obtains no credentials, and a
/// real AWS IoT broker rejects a pool id as username: it wants client certificates on
/// 8883 or SigV4-signed WebSockets. Brokers that accept username auth work as is.
#[derive(Clone, Debug, Default)]
pub struct GuestIdentity {
    pool_id: Arc<RwLock<Option<String>>>,
}

impl GuestIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity_pool_id(&self) -> Option<String> {
        match self.pool_id.read() {
            Ok(guard) => guard.clone(),
            Err(e) => {
                warn!("Identity state unreadable: {}", e);
                None
            }
        }
    }
}

impl IdentityBootstrap for GuestIdentity {
    fn configure(&self, identity_pool_id: &str, region: &str) {
        // pool ids look like "<region>:<uuid>"
        match identity_pool_id.split_once(':') {
            Some((pool_region, _)) if pool_region != region => warn!(
                "Identity pool {} belongs to region {}, not {}",
                identity_pool_id, pool_region, region
            ),
            Some(_) => {}
            None => warn!(
                "Identity pool id {} has no region prefix",
                identity_pool_id
            ),
        }

        match self.pool_id.write() {
            Ok(mut guard) => {
                *guard = Some(identity_pool_id.to_string());
                info!("Configured guest identity for pool {}", identity_pool_id);
            }
            Err(e) => warn!("Could not store identity pool id: {}", e),
        }
    }
}
