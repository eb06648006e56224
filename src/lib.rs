// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client-side orchestration of Apple notarization.
//!
//! Notarization works by uploading a signed artifact to Apple, waiting
//! for Apple's scanners to issue a verdict, and then *stapling* the
//! resulting ticket onto the artifact so Gatekeeper can verify it
//! offline. This crate implements the orchestration around Apple's
//! tools: submission, status polling with backoff, transient-failure
//! classification, and ordered stapling of nested bundle trees.
//!
//! What this crate deliberately does not do: sign or package artifacts
//! (it consumes already-signed paths), manage credentials or keychains
//! (it consumes pre-resolved strings), or expose a CLI (it is a library
//! for a driver to call).
//!
//! # Architecture
//!
//! * [NotaryBackend] is the two-operation contract (`submit`, `poll`)
//!   over Apple's notary tools, with one implementation per tool
//!   generation: [AltoolBackend] and [NotarytoolBackend], selected by
//!   [NotarizationTool] in the configuration.
//! * [NotarizationCoordinator] drives a batch: submit every artifact,
//!   then poll all outstanding requests in rounds with capped
//!   exponential backoff until everything resolves, one fails, or the
//!   global wait budget runs out. [NotarizationCoordinator::wait_for_results]
//!   streams request IDs as they succeed.
//! * [Stapler] attaches tickets to the parts of an artifact tree,
//!   nested bundles before their containers.
//! * [RetryableRunner] underlies the external tool invocations that are
//!   safe to repeat, retrying only exit codes known to be transient for
//!   that specific operation.
//!
//! Everything is synchronous and single-threaded; the only waits are
//! subprocess completions and explicit sleeps.
//!
//! # Example
//!
//! ```no_run
//! use apple_notarize::{
//!     NotarizationConfig, NotarizationCoordinator, NotarizationTool,
//! };
//!
//! # fn main() -> Result<(), apple_notarize::NotarizationError> {
//! let config = NotarizationConfig {
//!     notarization_tool: NotarizationTool::Notarytool,
//!     notary_user: "dev@example.com".into(),
//!     notary_password: "@keychain:notary-profile".into(),
//!     notary_asc_provider: None,
//!     notary_team_id: Some("EXAMPLETEAM".into()),
//!     primary_bundle_id: "com.example.app".into(),
//! };
//!
//! let coordinator = NotarizationCoordinator::for_config(config);
//! let requests = coordinator.submit_all(["out/App.zip"])?;
//!
//! let ids = requests
//!     .iter()
//!     .map(|r| r.request_id.clone())
//!     .collect::<Vec<_>>();
//!
//! for resolved in coordinator.wait_for_results(&ids) {
//!     println!("notarized {}", resolved?);
//! }
//! # Ok(())
//! # }
//! ```

mod altool;
pub use altool::*;
mod config;
pub use config::*;
mod coordinator;
pub use coordinator::*;
mod error;
pub use error::*;
mod notary;
pub use notary::*;
mod notarytool;
pub use notarytool::*;
mod process;
pub use process::*;
mod retry;
pub use retry::*;
mod stapling;
pub use stapling::*;
