// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared state available to HTTP request handlers

use crate::app::Panel;
use slog::Logger;
use std::sync::Arc;

pub struct ServerContext {
    pub panel: Arc<Panel>,
    pub log: Logger,
}
