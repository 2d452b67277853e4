//! # sigstack-fsm-core
//!
//! Generic finite-state-machine runtime shared by every protocol controller
//! in the stack. It knows nothing about SIP or MSRP.
//!
//! A protocol plugs in by defining:
//!
//! - a closed [`Signal`] enum and its payload-free kind,
//! - a `Copy` state enum,
//! - a context type implementing [`Machine`] with enter/exit hooks,
//! - one [`StateTable`] built with [`StateTableBuilder`].
//!
//! Machines then run either synchronously through [`Fsm`] or on their own
//! tokio task through [`spawn_machine`], which gives every instance an
//! unbounded mailbox so any thread can post signals while each machine
//! still handles them one at a time.
//!
//! ```rust
//! use std::sync::Arc;
//! use sigstack_fsm_core::{Condition, Fsm, Machine, Signal, StateTableBuilder};
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Door { Closed, Open }
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Push { Open, Close }
//!
//! #[derive(Debug)]
//! struct Cmd(Push);
//! impl Signal for Cmd {
//!     type Kind = Push;
//!     fn kind(&self) -> Push { self.0 }
//! }
//!
//! struct Ctx;
//! impl Machine for Ctx {
//!     type Signal = Cmd;
//!     type State = Door;
//!     fn id(&self) -> &str { "door" }
//! }
//!
//! let table = StateTableBuilder::<Ctx>::new("door")
//!     .state(Door::Closed)
//!     .state(Door::Open)
//!     .add_transition(Door::Closed, Condition::on_kind(Push::Open), Door::Open)
//!     .add_transition(Door::Open, Condition::on_kind(Push::Close), Door::Closed)
//!     .build()
//!     .unwrap();
//!
//! let mut fsm = Fsm::new(Arc::new(table), Door::Closed, Ctx);
//! fsm.process(Cmd(Push::Open));
//! assert_eq!(fsm.state(), Door::Open);
//! ```

pub mod condition;
pub mod error;
pub mod fsm;
pub mod machine;
pub mod resources;
pub mod runner;
pub mod signal;
pub mod table;
pub mod timer;

pub use condition::Condition;
pub use error::{FsmError, Result};
pub use fsm::{Delivery, Fsm};
pub use machine::Machine;
pub use resources::{DefaultResourceProvider, ResourceProvider};
pub use runner::{spawn_machine, MachineHandle, SignalSender};
pub use signal::{Signal, StateId};
pub use table::{StateKind, StateNode, StateTable, StateTableBuilder, Transition};
pub use timer::{TimerHandle, TimerService};
