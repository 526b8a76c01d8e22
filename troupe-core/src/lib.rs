// Copyright 2025 0xjcf
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! # troupe
//! An actor runtime: addressable actors with private state, per-actor
//! mailboxes drained by a shared dispatcher pool, bounded supervision and a
//! lookup-or-start path that constructs at most one actor per address.
//!
//! ```rust,no_run
//! use troupe_core::prelude::*;
//!
//! #[derive(Default)]
//! struct Counter {
//!     total: u64,
//! }
//!
//! impl Actor for Counter {}
//!
//! # fn main() -> Result<(), StageError> {
//! let stage = Stage::start(StageConfig::default())?;
//! let counter = stage.actor_for::<Counter>(Definition::with(Counter::default))?;
//!
//! counter.tell("add(2)", |counter, _ctx| {
//!     counter.total += 2;
//!     Ok(())
//! })?;
//! let total = counter.ask("total()", |counter, _ctx| Ok(counter.total))?;
//! assert_eq!(total.wait().ok(), Some(2));
//!
//! stage.terminate();
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod address;
pub mod config;
pub mod dead_letters;
pub mod definition;
pub mod error;
pub mod mailbox;
pub mod protocol;
pub mod reference;
pub mod scheduler;
pub mod stage;
pub mod supervision;

mod directory;
mod dispatcher;
mod environment;
mod lifecycle;
mod panic;

pub use actor::{Actor, Context};
pub use address::{Address, AddressFactory};
pub use config::{DispatcherConfig, MailboxConfig, MailboxKind, StageConfig};
pub use dead_letters::{DeadLetter, DeadLetters, DeadLettersListener};
pub use definition::{ActorType, Definition, Parameter, Parameters};
pub use environment::LifeCycleState;
pub use error::{
    ActorError, CompletesError, ConstructionError, ConstructionFailure, MailboxError, StageError,
};
pub use mailbox::{Invocation, Mailbox, MailboxProvider, Message};
pub use protocol::Protocol;
pub use reference::{ActorRef, Completes, Proxy};
pub use scheduler::{Cancellable, Scheduler};
pub use stage::Stage;
pub use supervision::{Intensity, Scope, Supervised, SupervisionStrategy, Supervisor};

pub mod prelude {
    pub use crate::{
        Actor, ActorError, ActorRef, Address, Context, Definition, Intensity, Parameter,
        Parameters, Protocol, Scope, Stage, StageConfig, StageError, Supervised,
        SupervisionStrategy, Supervisor,
    };
}
