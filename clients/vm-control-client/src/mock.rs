// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mock [`VmController`] for tests and local development
//!
//! Records every call and answers from per-operation result queues.  With no
//! queued result, operations succeed and `create`/`clone` assign external
//! names of the form `mwsvm-<n>`.

use crate::VmApiResponse;
use crate::VmController;
use async_trait::async_trait;
use mws_common::params::NetconfParams;
use mws_common::params::VmCreateParams;
use mws_common::states::PowerAction;
use mws_common::Error;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One recorded call to the mock controller
#[derive(Clone, Debug, PartialEq)]
pub enum VmCall {
    Create { hostname: String },
    Delete { vmid: String },
    Button { vmid: String, action: PowerAction },
    Clone { source_vmid: String, hostname: String },
}

#[derive(Default)]
struct State {
    calls: Vec<VmCall>,
    create_results: VecDeque<Result<VmApiResponse, Error>>,
    delete_results: VecDeque<Result<(), Error>>,
    button_results: VecDeque<Result<(), Error>>,
    clone_results: VecDeque<Result<VmApiResponse, Error>>,
    next_vmid: u32,
}

#[derive(Default)]
pub struct MockVmController {
    state: Mutex<State>,
}

impl MockVmController {
    pub fn new() -> MockVmController {
        MockVmController::default()
    }

    /// Snapshot of all calls made so far, in order.
    pub fn calls(&self) -> Vec<VmCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.count(|c| matches!(c, VmCall::Create { .. }))
    }

    pub fn delete_calls(&self) -> usize {
        self.count(|c| matches!(c, VmCall::Delete { .. }))
    }

    fn count(&self, pred: impl Fn(&VmCall) -> bool) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn push_create_result(&self, result: Result<VmApiResponse, Error>) {
        self.state.lock().unwrap().create_results.push_back(result);
    }

    pub fn push_delete_result(&self, result: Result<(), Error>) {
        self.state.lock().unwrap().delete_results.push_back(result);
    }

    pub fn push_button_result(&self, result: Result<(), Error>) {
        self.state.lock().unwrap().button_results.push_back(result);
    }

    pub fn push_clone_result(&self, result: Result<VmApiResponse, Error>) {
        self.state.lock().unwrap().clone_results.push_back(result);
    }

    fn fresh_vmid(state: &mut State) -> String {
        state.next_vmid += 1;
        format!("mwsvm-{:05}", state.next_vmid)
    }
}

#[async_trait]
impl VmController for MockVmController {
    async fn create_vm(
        &self,
        params: &VmCreateParams,
    ) -> Result<VmApiResponse, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(VmCall::Create {
            hostname: params.netconf.hostname.clone(),
        });
        match state.create_results.pop_front() {
            Some(result) => result,
            None => {
                let vmid = Self::fresh_vmid(&mut state);
                Ok(VmApiResponse { vmid: Some(vmid) })
            }
        }
    }

    async fn delete_vm(&self, vmid: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(VmCall::Delete { vmid: vmid.to_string() });
        state.delete_results.pop_front().unwrap_or(Ok(()))
    }

    async fn button(
        &self,
        vmid: &str,
        action: PowerAction,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(VmCall::Button { vmid: vmid.to_string(), action });
        state.button_results.pop_front().unwrap_or(Ok(()))
    }

    async fn clone_vm(
        &self,
        source_vmid: &str,
        netconf: &NetconfParams,
    ) -> Result<VmApiResponse, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(VmCall::Clone {
            source_vmid: source_vmid.to_string(),
            hostname: netconf.hostname.clone(),
        });
        match state.clone_results.pop_front() {
            Some(result) => result,
            None => {
                let vmid = Self::fresh_vmid(&mut state);
                Ok(VmApiResponse { vmid: Some(vmid) })
            }
        }
    }
}
