use axum::{
    extract::{Request, State},
    middleware::{from_fn_with_state, Next},
    response::Response,
    Router,
};
use tracing::debug;

use crate::access::{authorize, Capability};
use crate::auth::AuthContext;
use crate::errors::AppError;
use crate::state::AppState;

#[derive(Clone)]
pub struct Gate {
    auth: AuthContext,
    capability: Capability,
}

/// Rejects the request unless the current session holds the gate's capability.
pub async fn require_capability(
    State(gate): State<Gate>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let snapshot = gate.auth.snapshot();
    if let Err(e) = authorize(&snapshot, gate.capability) {
        debug!(
            "Denied {} {} (needs {:?})",
            request.method(),
            request.uri().path(),
            gate.capability
        );
        return Err(e);
    }
    Ok(next.run(request).await)
}

/// Puts every route of `router` behind `capability`.
pub fn gated(
    router: Router<AppState>,
    state: &AppState,
    capability: Capability,
) -> Router<AppState> {
    let gate = Gate {
        auth: state.auth.clone(),
        capability,
    };
    router.route_layer(from_fn_with_state(gate, require_capability))
}
