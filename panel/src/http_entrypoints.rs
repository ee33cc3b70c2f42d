// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP surface of the panel: the post-installation callback and the
//! inventory export consumed by the convergence runner

use crate::context::ServerContext;
use crate::inventory;
use crate::inventory::HostVars;
use dropshot::endpoint;
use dropshot::ApiDescription;
use dropshot::HttpError;
use dropshot::HttpResponseOk;
use dropshot::HttpResponseUpdatedNoContent;
use dropshot::Path;
use dropshot::RequestContext;
use dropshot::TypedBody;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

type ApiContext = Arc<ServerContext>;

/// Returns a description of the panel API
pub fn api() -> ApiDescription<ApiContext> {
    let mut api = ApiDescription::new();
    api.register(post_installation).unwrap();
    api.register(inventory_list).unwrap();
    api.register(inventory_host).unwrap();
    api
}

/// Body of the post-installation callback
#[derive(Deserialize, JsonSchema)]
pub struct PostInstallationBody {
    /// id of the VM whose installation finished
    pub vm: Uuid,
    /// the one-time secret issued with the create request
    pub token: String,
}

/// Notification from the external installer that a VM's OS installation
/// has finished.  Authenticated by the VM's one-time token.
#[endpoint {
    method = POST,
    path = "/api/post-installation",
}]
async fn post_installation(
    rqctx: RequestContext<ApiContext>,
    body: TypedBody<PostInstallationBody>,
) -> Result<HttpResponseUpdatedNoContent, HttpError> {
    let ctx = rqctx.context();
    let body = body.into_inner();
    ctx.panel.post_installation(body.vm, &body.token).await?;
    Ok(HttpResponseUpdatedNoContent())
}

/// The full ansible inventory (dynamic-inventory `--list` shape)
#[endpoint {
    method = GET,
    path = "/api/inventory",
}]
async fn inventory_list(
    rqctx: RequestContext<ApiContext>,
) -> Result<HttpResponseOk<serde_json::Value>, HttpError> {
    let ctx = rqctx.context();
    let inventory = inventory::build_inventory(ctx.panel.datastore())?;
    Ok(HttpResponseOk(inventory))
}

#[derive(Deserialize, JsonSchema)]
pub struct InventoryHostPath {
    pub host: String,
}

/// Variables for one host (dynamic-inventory `--host` shape)
#[endpoint {
    method = GET,
    path = "/api/inventory/{host}",
}]
async fn inventory_host(
    rqctx: RequestContext<ApiContext>,
    path_params: Path<InventoryHostPath>,
) -> Result<HttpResponseOk<HostVars>, HttpError> {
    let ctx = rqctx.context();
    let host = path_params.into_inner().host;
    match inventory::host_vars(ctx.panel.datastore(), &host)? {
        Some(vars) => Ok(HttpResponseOk(vars)),
        None => Err(HttpError::for_not_found(
            None,
            format!("no VM uses hostname {:?}", host),
        )),
    }
}
