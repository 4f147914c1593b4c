// Cost-management API endpoint descriptors.
// Typed factories for the requests the dashboard issues most often.

use std::time::Duration;

use serde_json::{Value, json};

use super::descriptor::{ErrorTransform, Method, RequestDescriptor, SuccessTransform};

/// TTL for slowly changing reference data (organizations, pools).
pub const REFERENCE_TTL: Duration = Duration::from_secs(60);

/// TTL for expense summaries.
pub const EXPENSES_TTL: Duration = Duration::from_secs(5 * 60);

pub const ORGANIZATIONS: &str = "organizations";
pub const POOLS: &str = "pools";
pub const POOL: &str = "pool";
pub const POOL_EXPENSES: &str = "poolExpenses";
pub const CREATE_POOL: &str = "createPool";
pub const UPDATE_POOL: &str = "updatePool";
pub const DELETE_POOL: &str = "deletePool";

/// Organizations visible to the current user.
pub fn organizations() -> RequestDescriptor {
    RequestDescriptor::get(ORGANIZATIONS, "/organizations")
        .with_ttl(REFERENCE_TTL)
        .on_success(SuccessTransform::PointerOr {
            pointer: "/organizations".to_string(),
            fallback: json!([]),
        })
}

/// Pools of an organization.
pub fn pools(org_id: &str) -> RequestDescriptor {
    RequestDescriptor::get(POOLS, format!("/organizations/{}/pools", org_id))
        .with_param("orgId", org_id)
        .with_ttl(REFERENCE_TTL)
}

/// A single pool with its children.
pub fn pool(pool_id: &str, children: bool) -> RequestDescriptor {
    RequestDescriptor::get(POOL, format!("/pools/{}", pool_id))
        .with_param("poolId", pool_id)
        .with_param("children", children)
        .with_ttl(REFERENCE_TTL)
}

/// Expenses of a pool in `[start, end]` (unix seconds).
pub fn pool_expenses(pool_id: &str, start: i64, end: i64) -> RequestDescriptor {
    RequestDescriptor::get(POOL_EXPENSES, format!("/pools/{}/expenses", pool_id))
        .with_scope(pool_id)
        .with_param("start_date", start)
        .with_param("end_date", end)
        .with_ttl(EXPENSES_TTL)
}

/// Create a pool under `parent_id`.
pub fn create_pool(org_id: &str, parent_id: &str, params: Value) -> RequestDescriptor {
    RequestDescriptor::new(CREATE_POOL, Method::Post, format!("/organizations/{}/pools", org_id))
        .with_params(params)
        .with_param("parent_id", parent_id)
        .invalidating([POOLS, POOL])
        .allow_concurrent()
        .on_error(ErrorTransform::Message("Failed to create pool".to_string()))
}

/// Update a pool's fields.
pub fn update_pool(pool_id: &str, params: Value) -> RequestDescriptor {
    RequestDescriptor::new(UPDATE_POOL, Method::Patch, format!("/pools/{}", pool_id))
        .with_params(params)
        .invalidating([POOLS, POOL, POOL_EXPENSES])
        .allow_concurrent()
        .on_error(ErrorTransform::Message("Failed to update pool".to_string()))
}

/// Delete a pool.
pub fn delete_pool(pool_id: &str) -> RequestDescriptor {
    RequestDescriptor::new(DELETE_POOL, Method::Delete, format!("/pools/{}", pool_id))
        .invalidating([POOLS, POOL, POOL_EXPENSES])
        .allow_concurrent()
        .on_error(ErrorTransform::Message("Failed to delete pool".to_string()))
}
