use pdk_gateway::GatewayError;

/// Request-level failures. Per-item remote failures never surface here; they
/// are recorded in the workflow reports.
#[derive(Debug)]
pub enum EngineError {
    ShopNotFound { shop_id: i64 },
    /// The gateway factory refused the shop's stored credentials.
    CredentialsRejected { shop_id: i64, reason: String },
    ActionNotFound { shop_id: i64, action_id: i64 },
    NoCampaigns { shop_id: i64 },
    LossProductsNotFound { shop_id: i64 },
    InvalidInput(String),
    /// A whole-operation remote read failed (campaign list, catalog page).
    Remote(GatewayError),
    Store(anyhow::Error),
}

impl EngineError {
    /// Stable machine-readable tag, used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::ShopNotFound { .. } => "shop_not_found",
            EngineError::CredentialsRejected { .. } => "credentials_rejected",
            EngineError::ActionNotFound { .. } => "action_not_found",
            EngineError::NoCampaigns { .. } => "no_campaigns",
            EngineError::LossProductsNotFound { .. } => "loss_products_not_found",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::Remote(_) => "remote_failure",
            EngineError::Store(_) => "store_failure",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::ShopNotFound { .. }
                | EngineError::ActionNotFound { .. }
                | EngineError::NoCampaigns { .. }
                | EngineError::LossProductsNotFound { .. }
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::ShopNotFound { shop_id } => write!(f, "shop {shop_id} not found"),
            EngineError::CredentialsRejected { shop_id, reason } => {
                write!(f, "shop {shop_id} credentials unusable: {reason}")
            }
            EngineError::ActionNotFound { shop_id, action_id } => {
                write!(f, "action {action_id} not found or not active for shop {shop_id}")
            }
            EngineError::NoCampaigns { shop_id } => {
                write!(f, "no active campaign resolved for shop {shop_id}")
            }
            EngineError::LossProductsNotFound { shop_id } => {
                write!(f, "none of the loss products belong to shop {shop_id}")
            }
            EngineError::InvalidInput(m) => write!(f, "invalid input: {m}"),
            EngineError::Remote(e) => write!(f, "marketplace call failed: {e}"),
            EngineError::Store(e) => write!(f, "store failure: {e:#}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Remote(e) => Some(e),
            EngineError::Store(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        EngineError::Store(e)
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
