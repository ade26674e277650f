// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::sync::Arc;
use std::sync::Mutex;

/// RuntimeState is a per-fragment-instance execution context handed to every
/// operator verb. It carries the identifiers and the shared error slot;
/// operators own everything else themselves.
#[derive(Debug)]
pub struct RuntimeState {
    fragment_instance_id: Option<(i64, i64)>,
    error_state: Arc<RuntimeErrorState>,
}

#[derive(Debug, Default)]
pub struct RuntimeErrorState {
    error: Mutex<Option<String>>,
}

impl RuntimeErrorState {
    pub fn set_error(&self, err: String) {
        let mut guard = self.error.lock().expect("runtime error lock");
        if guard.is_none() {
            *guard = Some(err);
        }
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().expect("runtime error lock").clone()
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            fragment_instance_id: None,
            error_state: Arc::new(RuntimeErrorState::default()),
        }
    }
}

impl RuntimeState {
    pub fn new(fragment_instance_id: Option<(i64, i64)>) -> Self {
        Self {
            fragment_instance_id,
            error_state: Arc::new(RuntimeErrorState::default()),
        }
    }

    pub fn fragment_instance_id(&self) -> Option<(i64, i64)> {
        self.fragment_instance_id
    }

    pub fn error_state(&self) -> &Arc<RuntimeErrorState> {
        &self.error_state
    }

    pub fn error(&self) -> Option<String> {
        self.error_state.error()
    }
}
