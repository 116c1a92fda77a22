//! Typed client contracts.
//!
//! A [`Contract`] is the client-side mirror of a service: the module type it
//! expects and the operations it calls. [`bind`] checks the contract against
//! the server's describe payload once, so a client built against a different
//! service version fails at bind time instead of at its first call.

use crate::client::RpcClient;
use crate::error::{ClientError, Result};
use crate::operation::Operation;
use crate::protocol::ServiceDescription;

pub trait Contract: Sized {
    const MODULE_TYPE: &'static str;
    const OPERATIONS: &'static [Operation];

    fn from_client(client: RpcClient) -> Self;
}

/// Check a describe payload against an expected module type and operation set.
///
/// # Errors
///
/// Returns `ClientError::ContractMismatch` describing the first difference.
pub fn verify(
    description: &ServiceDescription,
    module_type: &str,
    operations: &[Operation],
) -> Result<()> {
    let mismatch = |detail: String| ClientError::ContractMismatch {
        expected_type: module_type.to_string(),
        detail,
    };

    if description.module_type != module_type {
        return Err(mismatch(format!(
            "server hosts module type '{}'",
            description.module_type
        )));
    }

    for op in operations {
        match description.operation(op.name) {
            None => {
                return Err(mismatch(format!("operation '{}' is not exposed", op.name)));
            }
            Some(info) if info != op => {
                return Err(mismatch(format!(
                    "operation '{}' takes ({}), expected ({})",
                    op.name,
                    info.params.join(", "),
                    op.params.join(", ")
                )));
            }
            Some(_) => {}
        }
    }

    Ok(())
}

/// Verify the remote service behind `client` and wrap it in the typed client `C`.
///
/// # Errors
///
/// Returns the describe call's error, or `ClientError::ContractMismatch`.
pub async fn bind<C: Contract>(client: &RpcClient) -> Result<C> {
    let description = client.describe().await?;
    verify(&description, C::MODULE_TYPE, C::OPERATIONS)?;
    Ok(C::from_client(client.clone()))
}
