//! Configuration for launching the code model backend.

use std::collections::HashMap;
use std::time::Duration;

/// Configuration for starting the backend process.
#[derive(Debug, Clone)]
pub struct BackendConfig {
	/// Path or name of the backend executable.
	pub command: String,
	/// Arguments to pass to the executable.
	pub args: Vec<String>,
	/// Environment variables to set.
	pub env: HashMap<String, String>,
	/// How long to wait for the first `Alive` message after launch.
	pub start_timeout: Duration,
	/// Maximum unexpected exits tolerated within [`Self::restart_window`]
	/// before automatic restarts are given up.
	pub restart_limit: u32,
	/// Sliding window for [`Self::restart_limit`].
	pub restart_window: Duration,
}

impl BackendConfig {
	/// Create a configuration with default timeouts and restart policy.
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			args: Vec::new(),
			env: HashMap::new(),
			start_timeout: Duration::from_secs(10),
			restart_limit: 3,
			restart_window: Duration::from_secs(60),
		}
	}

	/// Add command line arguments.
	#[must_use]
	pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.args = args.into_iter().map(Into::into).collect();
		self
	}

	/// Add environment variables.
	#[must_use]
	pub fn env(
		mut self,
		env: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
	) -> Self {
		self.env = env.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
		self
	}

	/// Set the start timeout.
	#[must_use]
	pub fn start_timeout(mut self, timeout: Duration) -> Self {
		self.start_timeout = timeout;
		self
	}

	/// Set the restart policy: at most `limit` unexpected exits per `window`.
	#[must_use]
	pub fn restart_policy(mut self, limit: u32, window: Duration) -> Self {
		self.restart_limit = limit;
		self.restart_window = window;
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_config_builder() {
		let config = BackendConfig::new("codemodelbackend")
			.args(["--verbose"])
			.env([("CODEMODEL_LOG", "debug")])
			.start_timeout(Duration::from_secs(5))
			.restart_policy(2, Duration::from_secs(30));

		assert_eq!(config.command, "codemodelbackend");
		assert_eq!(config.args, vec!["--verbose"]);
		assert_eq!(config.env.get("CODEMODEL_LOG").map(String::as_str), Some("debug"));
		assert_eq!(config.start_timeout, Duration::from_secs(5));
		assert_eq!(config.restart_limit, 2);
		assert_eq!(config.restart_window, Duration::from_secs(30));
	}

	#[test]
	fn test_config_defaults() {
		let config = BackendConfig::new("codemodelbackend");
		assert!(config.args.is_empty());
		assert_eq!(config.restart_limit, 3);
		assert_eq!(config.restart_window, Duration::from_secs(60));
	}
}
