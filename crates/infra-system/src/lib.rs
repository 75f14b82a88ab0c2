// Shardline Infrastructure - System Adapters
// Implements: HostIdentity, ScriptExecutor

pub mod host_identity_impl;
pub mod subprocess_executor;

pub use host_identity_impl::SysinfoHostIdentity;
pub use subprocess_executor::SubprocessScriptExecutor;
