// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mock [`AnsibleRunner`] for tests
//!
//! Records every invocation and answers from a scripted result queue
//! (default success).  A gated mock additionally rendezvouses with the test:
//! each run announces itself on the `started` channel and then blocks until
//! the test sends a permit on the `proceed` channel, which is how tests hold
//! a convergence run "in flight" while issuing more requests.

use crate::AnsibleRunner;
use async_trait::async_trait;
use mws_common::params::AnsibleOperation;
use mws_common::Error;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Default)]
struct State {
    runs: Vec<(String, String)>,
    results: VecDeque<Result<(), Error>>,
}

struct Gate {
    started_tx: mpsc::UnboundedSender<String>,
    proceed_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<()>>,
}

/// Test-side handle to a gated mock runner
pub struct GateControl {
    /// receives the hostname each time a run reaches the gate
    pub started: mpsc::UnboundedReceiver<String>,
    /// send one permit per run that should be allowed to finish
    pub proceed: mpsc::UnboundedSender<()>,
}

#[derive(Default)]
pub struct MockAnsibleRunner {
    state: Mutex<State>,
    gate: Option<Gate>,
}

impl MockAnsibleRunner {
    /// An ungated mock: runs complete immediately.
    pub fn new() -> MockAnsibleRunner {
        MockAnsibleRunner::default()
    }

    /// A gated mock: every run blocks at the gate until released.
    pub fn gated() -> (MockAnsibleRunner, GateControl) {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        let (proceed_tx, proceed_rx) = mpsc::unbounded_channel();
        let runner = MockAnsibleRunner {
            state: Mutex::new(State::default()),
            gate: Some(Gate {
                started_tx,
                proceed_rx: tokio::sync::Mutex::new(proceed_rx),
            }),
        };
        (runner, GateControl { started: started_rx, proceed: proceed_tx })
    }

    /// All invocations so far as `(host, operation tag)` pairs, in order.
    pub fn runs(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().runs.clone()
    }

    /// Number of `default run` invocations so far.
    pub fn default_runs(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .runs
            .iter()
            .filter(|(_, tag)| tag == "default run")
            .count()
    }

    pub fn runs_with_tag(&self, tag: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .runs
            .iter()
            .filter(|(_, t)| t == tag)
            .count()
    }

    /// Queue the outcome of the next invocation; with an empty queue,
    /// invocations succeed.
    pub fn push_result(&self, result: Result<(), Error>) {
        self.state.lock().unwrap().results.push_back(result);
    }
}

#[async_trait]
impl AnsibleRunner for MockAnsibleRunner {
    async fn run(
        &self,
        host: &str,
        operation: &AnsibleOperation,
    ) -> Result<(), Error> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state
                .runs
                .push((host.to_string(), operation.tag().to_string()));
            state.results.pop_front().unwrap_or(Ok(()))
        };
        if let Some(gate) = &self.gate {
            // A dropped control handle means the test is done choreographing;
            // let remaining runs through.
            if gate.started_tx.send(host.to_string()).is_ok() {
                let _ = gate.proceed_rx.lock().await.recv().await;
            }
        }
        result
    }
}
