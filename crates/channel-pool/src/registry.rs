//! Named pools ("channels") with a default.
//!
//! A [`PoolRegistry`] maps case-insensitive channel names to pools built by a
//! [`PoolFactory`]. Lookups that omit the name resolve to the default
//! channel. Build it once at startup and share it (`Arc<PoolRegistry<_>>`)
//! with whatever needs a pool.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::manager::{ConnectionManager, PoolFactory};
use crate::pool::{Pool, PoolStats};

/// A set of named pools plus a default name.
pub struct PoolRegistry<M: ConnectionManager> {
    channels: RwLock<HashMap<String, Pool<M>>>,
    default_channel: RwLock<String>,
}

impl<M: ConnectionManager> PoolRegistry<M> {
    /// Create an empty registry whose default channel is `default_channel`.
    ///
    /// Channels are added with [`add_channel`](Self::add_channel). Nothing
    /// checks that the default is ever registered; only [`build`](Self::build)
    /// guarantees it names an existing channel. Until it does, looking up the
    /// default fails with [`RegistryError::ChannelNotFound`].
    #[must_use]
    pub fn new(default_channel: impl Into<String>) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            default_channel: RwLock::new(default_channel.into()),
        }
    }

    /// Build every configured channel with `factory`.
    ///
    /// Each pool is created in turn on the calling task, so pool construction
    /// (including any initial fill) runs on the same runtime the pools are
    /// later used from. The registry is returned only once every channel is
    /// ready.
    ///
    /// # Errors
    ///
    /// Returns the first pool construction error, or
    /// [`RegistryError::ChannelNotFound`] if channels were configured but none
    /// of them is the default.
    pub async fn build<F>(
        factory: &F,
        config: RegistryConfig<F::Config>,
    ) -> Result<Self, RegistryError>
    where
        F: PoolFactory<Manager = M>,
    {
        let RegistryConfig {
            default_channel,
            channels,
        } = config;

        let registry = Self::new(default_channel);
        for (name, channel_config) in channels {
            tracing::debug!(channel = %name, "building channel pool");
            let pool = factory.create_pool(&name, channel_config).await?;
            registry.add_channel(&name, pool);
        }

        if !registry.is_empty() {
            let default = registry.default_channel_name();
            if !registry.has_channel(&default) {
                return Err(RegistryError::ChannelNotFound(default));
            }
        }

        tracing::info!(
            channels = registry.len(),
            default = %registry.default_channel_name(),
            "pool registry ready"
        );
        Ok(registry)
    }

    /// Register `pool` under `name`, replacing any pool already registered
    /// under that name.
    pub fn add_channel(&self, name: &str, pool: Pool<M>) {
        let key = name.to_lowercase();
        if self.channels.write().insert(key, pool).is_some() {
            tracing::debug!(channel = name, "replaced existing channel");
        }
    }

    /// Look up a channel.
    ///
    /// `None` or an empty name resolves to the default channel.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NoChannels`] if nothing is registered,
    /// [`RegistryError::ChannelNotFound`] if the resolved name is unknown.
    /// That includes a default that was never registered on a registry made
    /// with [`new`](Self::new).
    pub fn get_channel(&self, name: Option<&str>) -> Result<Pool<M>, RegistryError> {
        let channels = self.channels.read();
        if channels.is_empty() {
            return Err(RegistryError::NoChannels);
        }

        let name = match name {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => self.default_channel.read().clone(),
        };

        channels
            .get(&name.to_lowercase())
            .cloned()
            .ok_or(RegistryError::ChannelNotFound(name))
    }

    /// The default channel's pool.
    pub fn default_channel(&self) -> Result<Pool<M>, RegistryError> {
        self.get_channel(None)
    }

    /// Case-insensitive existence check.
    ///
    /// `has_channel(&registry.default_channel_name())` is `false` while the
    /// default of a registry made with [`new`](Self::new) is unregistered.
    #[must_use]
    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.read().contains_key(&name.to_lowercase())
    }

    /// Change the default channel.
    ///
    /// # Errors
    ///
    /// [`RegistryError::ChannelNotFound`] if `name` is not registered; the
    /// previous default is kept.
    pub fn set_default_channel(&self, name: &str) -> Result<(), RegistryError> {
        if !self.has_channel(name) {
            return Err(RegistryError::ChannelNotFound(name.to_owned()));
        }
        *self.default_channel.write() = name.to_owned();
        Ok(())
    }

    /// The channel name lookups fall back to when they omit one.
    #[must_use]
    pub fn default_channel_name(&self) -> String {
        self.default_channel.read().clone()
    }

    /// Registered channel names (lower-cased), sorted.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    /// Whether no channels are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    /// Close every registered pool.
    ///
    /// Returns how many pools this call closed.
    pub fn close_all(&self) -> usize {
        let pools: Vec<_> = self.channels.read().values().cloned().collect();
        let closed = pools.iter().filter(|pool| pool.close()).count();
        tracing::info!(closed, "pool registry closed");
        closed
    }

    // Shortcuts on the default channel.

    /// [`Pool::get`] on the default channel.
    pub async fn get(&self) -> Result<M::Connection, RegistryError> {
        Ok(self.default_channel()?.get().await?)
    }

    /// [`Pool::put`] on the default channel.
    pub async fn put(&self, conn: Option<M::Connection>) -> Result<(), RegistryError> {
        Ok(self.default_channel()?.put(conn).await?)
    }

    /// [`Pool::fill`] on the default channel.
    pub async fn fill(&self, target: Option<usize>) -> Result<(), RegistryError> {
        Ok(self.default_channel()?.fill(target).await?)
    }

    /// [`Pool::length`] of the default channel.
    pub fn length(&self) -> Result<usize, RegistryError> {
        Ok(self.default_channel()?.length())
    }

    /// [`Pool::is_empty`] of the default channel.
    pub fn is_empty_channel(&self) -> Result<bool, RegistryError> {
        Ok(self.default_channel()?.is_empty())
    }

    /// [`Pool::is_full`] of the default channel.
    pub fn is_full(&self) -> Result<bool, RegistryError> {
        Ok(self.default_channel()?.is_full())
    }

    /// [`Pool::stats`] of the default channel.
    pub fn stats(&self) -> Result<PoolStats, RegistryError> {
        Ok(self.default_channel()?.stats())
    }

    /// [`Pool::close`] on the default channel.
    pub fn close(&self) -> Result<bool, RegistryError> {
        Ok(self.default_channel()?.close())
    }
}

impl<M: ConnectionManager> std::fmt::Debug for PoolRegistry<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("channels", &self.channel_names())
            .field("default_channel", &self.default_channel_name())
            .finish()
    }
}
