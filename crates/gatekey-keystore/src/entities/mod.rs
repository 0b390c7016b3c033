pub mod key_states;
pub mod request_logs;
pub mod upstream_keys;

pub use key_states::Entity as KeyStates;
pub use request_logs::Entity as RequestLogs;
pub use upstream_keys::Entity as UpstreamKeys;
