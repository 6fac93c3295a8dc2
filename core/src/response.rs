//! Reply selection for ident queries

use crate::config::{Config, SharedConfig, MAX_CUSTOM_LENGTH};
use crate::protocol::{parse_query, IdentQuery, IdentReply};
use crate::registry::{ActiveConnection, ConnectionRegistry};
use crate::system::{rfc1340_system_name, SystemInfo};
use std::sync::Arc;

/// Computes the reply for a query line against the live configuration
#[derive(Clone)]
pub struct IdentResponder {
    config: SharedConfig,
    registry: Arc<dyn ConnectionRegistry>,
    system: Arc<dyn SystemInfo>,
}

impl IdentResponder {
    pub fn new(
        config: SharedConfig,
        registry: Arc<dyn ConnectionRegistry>,
        system: Arc<dyn SystemInfo>,
    ) -> Self {
        Self {
            config,
            registry,
            system,
        }
    }

    /// Reply to a single query line
    pub fn respond(&self, line: &str) -> IdentReply {
        let query = match parse_query(line) {
            Ok(query) => query,
            Err(reply) => return reply,
        };

        let config = self.config.read().clone();
        let connection = self.registry.find_by_local_port(query.local_port);
        self.reply_for(&config, query, connection.as_ref())
    }

    fn reply_for(
        &self,
        config: &Config,
        query: IdentQuery,
        connection: Option<&ActiveConnection>,
    ) -> IdentReply {
        // always_on answers for ports with no known connection as well
        if !config.advanced.always_on && (connection.is_none() || config.advanced.is_no_user) {
            return IdentReply::NoUser(query);
        }

        if config.advanced.is_hidden_user {
            return IdentReply::HiddenUser(query);
        }

        IdentReply::UserId {
            query,
            os: self.os_for(config),
            user: self.user_for(config, connection),
        }
    }

    fn os_for(&self, config: &Config) -> String {
        if config.advanced.use_custom_system {
            if let Some(custom) = usable_custom(&config.advanced.custom_system) {
                return custom.to_string();
            }
        }

        rfc1340_system_name(&self.system.os_name()).to_string()
    }

    fn user_for(&self, config: &Config, connection: Option<&ActiveConnection>) -> String {
        if config.general.use_custom_name {
            if let Some(custom) = usable_custom(&config.general.custom_name) {
                return custom.to_string();
            }
        }

        if config.general.use_nickname {
            if let Some(nickname) = connection.and_then(|c| c.nickname.as_deref()) {
                return nickname.to_string();
            }
        }

        if config.general.use_username {
            if let Some(username) = connection.and_then(|c| c.username.as_deref()) {
                return username.to_string();
            }
        }

        self.system.user_name()
    }
}

fn usable_custom(value: &str) -> Option<&str> {
    let length = value.chars().count();
    (length > 0 && length <= MAX_CUSTOM_LENGTH).then_some(value)
}
