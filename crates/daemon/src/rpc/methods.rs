use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tably_common::protocol::jsonrpc::{
    Request, RequestId, Response, RpcError, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR,
};
use tably_common::protocol::rpc_methods::{
    self as methods, Ack, CategorizeParams, CreateWorkspaceParams, HostTabEvent, Outcome,
    RegisterWindowParams, WindowParams, WorkspaceParams,
};
use tokio::sync::broadcast;
use tracing::debug;

use crate::categorize::{Categorizer, HeuristicCategorizer, TabGroupPlan, TabSummary};
use crate::sync::SyncService;

/// Shared state behind every RPC transport.
#[derive(Clone)]
pub struct RpcServerState {
    service: Arc<SyncService>,
    categorizer: Arc<dyn Categorizer>,
    shutdown_notifier: Option<broadcast::Sender<()>>,
}

impl RpcServerState {
    pub fn new(service: Arc<SyncService>) -> Self {
        Self { service, categorizer: Arc::new(HeuristicCategorizer), shutdown_notifier: None }
    }

    pub fn with_categorizer(mut self, categorizer: Arc<dyn Categorizer>) -> Self {
        self.categorizer = categorizer;
        self
    }

    pub fn with_shutdown_notifier(mut self, shutdown_notifier: broadcast::Sender<()>) -> Self {
        self.shutdown_notifier = Some(shutdown_notifier);
        self
    }

    pub fn service(&self) -> &Arc<SyncService> {
        &self.service
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CategorizeResult {
    pub categorizer: String,
    pub groups: Vec<TabGroupPlan>,
}

pub async fn handle_raw_request(raw: &[u8], state: &RpcServerState) -> Response {
    let request = match serde_json::from_slice::<Request>(raw) {
        Ok(request) => request,
        Err(error) => {
            return Response::error(
                RequestId::Null,
                RpcError {
                    code: PARSE_ERROR,
                    message: "Parse error".to_string(),
                    data: Some(json!({ "reason": error.to_string() })),
                },
            );
        }
    };

    if request.jsonrpc != "2.0" {
        return Response::error(
            request.id,
            RpcError { code: INVALID_REQUEST, message: "Invalid Request".to_string(), data: None },
        );
    }

    dispatch_request(request, state).await
}

pub async fn dispatch_request(request: Request, state: &RpcServerState) -> Response {
    debug!(method = %request.method, "dispatching rpc request");
    match request.method.as_str() {
        methods::RPC_PING => Response::success(request.id, json!({ "ok": true })),
        methods::DAEMON_SHUTDOWN => {
            if let Some(notifier) = &state.shutdown_notifier {
                let _ = notifier.send(());
            }
            Response::success(request.id, json!({ "ok": true }))
        }
        methods::WORKSPACE_CREATE => handle_workspace_create(request, state).await,
        methods::WORKSPACE_JOIN => handle_workspace_join(request, state).await,
        methods::WORKSPACE_LEAVE => handle_workspace_leave(request, state),
        methods::WORKSPACE_STATUS => handle_workspace_status(request, state).await,
        methods::WINDOW_REGISTER => handle_window_register(request, state).await,
        methods::WINDOW_MEMBERSHIP => handle_window_membership(request, state),
        methods::WINDOW_BINDINGS => outcome(request.id, Outcome::ok(state.service.bindings())),
        methods::WINDOW_MARK_INITIALIZING => handle_window_guard(request, state, true),
        methods::WINDOW_UNMARK_INITIALIZING => handle_window_guard(request, state, false),
        methods::TABS_EVENT => handle_tabs_event(request, state).await,
        methods::TABS_CATEGORIZE => handle_tabs_categorize(request, state).await,
        methods::STORE_CHECK => {
            outcome(request.id, Outcome::ok(state.service.check_connectivity().await))
        }
        _ => Response::error(
            request.id,
            RpcError {
                code: METHOD_NOT_FOUND,
                message: "Method not found".to_string(),
                data: None,
            },
        ),
    }
}

// ── Workspace handlers ─────────────────────────────────────────────

async fn handle_workspace_create(request: Request, state: &RpcServerState) -> Response {
    let params: CreateWorkspaceParams = match request.params {
        Some(params) => match decode_params(methods::WORKSPACE_CREATE, params, &request.id) {
            Ok(params) => params,
            Err(response) => return response,
        },
        None => CreateWorkspaceParams::default(),
    };

    let result = state.service.create_workspace(params.name).await;
    outcome(request.id, Outcome::from_result(result))
}

async fn handle_workspace_join(request: Request, state: &RpcServerState) -> Response {
    let params: WorkspaceParams = match required_params(methods::WORKSPACE_JOIN, request.params, &request.id) {
        Ok(params) => params,
        Err(response) => return response,
    };

    let result = state.service.join_workspace(params.workspace_id).await;
    outcome(request.id, Outcome::from_result(result))
}

fn handle_workspace_leave(request: Request, state: &RpcServerState) -> Response {
    let params: WorkspaceParams = match required_params(methods::WORKSPACE_LEAVE, request.params, &request.id) {
        Ok(params) => params,
        Err(response) => return response,
    };

    outcome(request.id, Outcome::from_result(state.service.leave_workspace(params.workspace_id)))
}

async fn handle_workspace_status(request: Request, state: &RpcServerState) -> Response {
    let params: WorkspaceParams = match required_params(methods::WORKSPACE_STATUS, request.params, &request.id) {
        Ok(params) => params,
        Err(response) => return response,
    };

    let result = state.service.workspace_status(params.workspace_id).await;
    outcome(request.id, Outcome::from_result(result))
}

// ── Window handlers ────────────────────────────────────────────────

async fn handle_window_register(request: Request, state: &RpcServerState) -> Response {
    let params: RegisterWindowParams =
        match required_params(methods::WINDOW_REGISTER, request.params, &request.id) {
            Ok(params) => params,
            Err(response) => return response,
        };

    let result = state.service.register_window(params.workspace_id, params.window_id).await;
    outcome(request.id, Outcome::from_result(result.map(|()| Ack {})))
}

fn handle_window_membership(request: Request, state: &RpcServerState) -> Response {
    let params: WindowParams = match required_params(methods::WINDOW_MEMBERSHIP, request.params, &request.id) {
        Ok(params) => params,
        Err(response) => return response,
    };

    outcome(request.id, Outcome::ok(state.service.check_membership(params.window_id)))
}

fn handle_window_guard(request: Request, state: &RpcServerState, initializing: bool) -> Response {
    let method = if initializing {
        methods::WINDOW_MARK_INITIALIZING
    } else {
        methods::WINDOW_UNMARK_INITIALIZING
    };
    let params: WindowParams = match required_params(method, request.params, &request.id) {
        Ok(params) => params,
        Err(response) => return response,
    };

    if initializing {
        state.service.mark_initializing(params.window_id);
    } else {
        state.service.unmark_initializing(params.window_id);
    }
    outcome(request.id, Outcome::ok(Ack {}))
}

// ── Tab handlers ───────────────────────────────────────────────────

async fn handle_tabs_event(request: Request, state: &RpcServerState) -> Response {
    let event: HostTabEvent = match required_params(methods::TABS_EVENT, request.params, &request.id) {
        Ok(event) => event,
        Err(response) => return response,
    };

    outcome(request.id, Outcome::ok(state.service.handle_tab_event(event).await))
}

async fn handle_tabs_categorize(request: Request, state: &RpcServerState) -> Response {
    let params: CategorizeParams =
        match required_params(methods::TABS_CATEGORIZE, request.params, &request.id) {
            Ok(params) => params,
            Err(response) => return response,
        };

    let tabs = match state.service.window_tabs(params.window_id).await {
        Ok(tabs) => tabs,
        Err(error) => return outcome::<CategorizeResult>(request.id, Outcome::failed(error.to_string())),
    };
    let summaries: Vec<TabSummary> = tabs
        .into_iter()
        .map(|tab| TabSummary { title: tab.title.unwrap_or_default(), url: tab.url.unwrap_or_default() })
        .collect();

    let groups = state.categorizer.categorize(&summaries).await;
    let result = CategorizeResult { categorizer: state.categorizer.name().to_string(), groups };
    outcome(request.id, Outcome::ok(result))
}

// ── Helpers ────────────────────────────────────────────────────────

fn outcome<T: Serialize>(request_id: RequestId, outcome: Outcome<T>) -> Response {
    Response::success(request_id, json!(outcome))
}

fn required_params<P: DeserializeOwned>(
    method: &str,
    params: Option<Value>,
    request_id: &RequestId,
) -> Result<P, Response> {
    let Some(params) = params else {
        return Err(invalid_params_response(request_id.clone(), format!("{method} requires params")));
    };
    decode_params(method, params, request_id)
}

fn decode_params<P: DeserializeOwned>(
    method: &str,
    params: Value,
    request_id: &RequestId,
) -> Result<P, Response> {
    serde_json::from_value::<P>(params).map_err(|error| {
        invalid_params_response(request_id.clone(), format!("failed to decode {method} params: {error}"))
    })
}

fn invalid_params_response(request_id: RequestId, reason: String) -> Response {
    Response::error(
        request_id,
        RpcError {
            code: INVALID_PARAMS,
            message: "Invalid params".to_string(),
            data: Some(json!({ "reason": reason })),
        },
    )
}
