use clap::Parser;
use consul_lock::{
    BackendConfig, DEFAULT_LOCK_DELAY_SECS, DEFAULT_NAMESPACE, LockOptions, SessionPayload,
};

/// Run PROGRAM only while holding the Consul lock on KEY
#[derive(Parser, Debug)]
#[command(name = "consul-lock", version)]
pub struct Cli {
    /// No delay. If KEY is locked by another process, give up
    #[arg(short = 'n', conflicts_with = "delay")]
    pub no_delay: bool,

    /// (Default.) Delay. If KEY is locked by another process, wait until it can be locked
    #[arg(short = 'N')]
    pub delay: bool,

    /// If KEY is locked, exit zero
    #[arg(short = 'x', conflicts_with = "exit_nonzero")]
    pub exit_zero: bool,

    /// (Default.) If KEY is locked, print an error message and exit nonzero
    #[arg(short = 'X')]
    pub exit_nonzero: bool,

    /// Session LockDelay in seconds
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_LOCK_DELAY_SECS)]
    pub lock_delay: u64,

    /// Consul agent address (falls back to CONSUL_HTTP_ADDR)
    #[arg(long, value_name = "URL")]
    pub address: Option<String>,

    /// Key-value prefix the lock keys live under
    #[arg(long, value_name = "NS", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Create sessions without a request body, leaving LockDelay and Name to the agent
    #[arg(long)]
    pub no_session_body: bool,

    /// Lock key
    pub key: String,

    /// Program to run, followed by its arguments
    #[arg(
        value_name = "PROGRAM",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

impl Cli {
    pub fn lock_options(&self) -> anyhow::Result<LockOptions> {
        let mut builder = LockOptions::builder();
        builder
            .blocking(self.delay || !self.no_delay)
            .lock_delay_secs(self.lock_delay);
        if self.exit_zero && !self.exit_nonzero {
            builder.contention_exit_code(0);
        }
        if self.no_session_body {
            builder.session_payload(SessionPayload::Empty);
        }
        Ok(builder.build()?)
    }

    pub fn backend_config(&self) -> anyhow::Result<BackendConfig> {
        Ok(BackendConfig::builder()
            .address(BackendConfig::resolve_address(self.address.clone()))
            .namespace(self.namespace.clone())
            .build()?)
    }

    /// Program and its arguments
    pub fn program(&self) -> (&str, &[String]) {
        match self.command.split_first() {
            Some((program, args)) => (program.as_str(), args),
            None => ("", &[]),
        }
    }
}
