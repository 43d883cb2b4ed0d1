//! Server configuration and wiring.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::info;

use crate::connection::ConnectionRegistry;
use crate::depot::{self, Depot, Mail};
use crate::error::{QuizzleError, Result};
use crate::pool::WorkerPool;
use crate::presence::Presence;
use crate::reactor::Reactor;
use crate::registration;
use crate::store::UserStore;
use crate::words::{MyMemoryTranslator, Translator};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tcp_port: u16,
    pub udp_port: u16,
    /// Wall-clock bound of a match, in minutes.
    pub match_minutes: u64,
    /// How long a match invitation stays valid, in seconds.
    pub invitation_secs: u64,
    /// Words served per match.
    pub num_words: usize,
    /// Worker pool size; must cover concurrent matches plus two.
    pub workers: usize,
    pub registry_port: u16,
    pub dictionary_path: String,
    pub database_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_port: 7777,
            udp_port: 7778,
            match_minutes: 2,
            invitation_secs: 10,
            num_words: 5,
            workers: 4,
            registry_port: registration::REGISTRY_PORT,
            dictionary_path: "ItalianDictionary.txt".to_string(),
            database_path: "Database.json".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tcp_port <= 1024 || self.udp_port <= 1024 {
            return Err(QuizzleError::config("ports must be above 1024"));
        }
        if self.match_minutes == 0 || self.invitation_secs == 0 {
            return Err(QuizzleError::config(
                "timers can only be set to positive values",
            ));
        }
        if self.num_words == 0 {
            return Err(QuizzleError::config("number of words must be positive"));
        }
        if self.workers < 4 {
            return Err(QuizzleError::config("worker pool size must be at least 4"));
        }
        Ok(())
    }
}

/// Process-wide handles every task receives. Passed by `Arc`, never global.
pub struct ServerContext {
    pub config: ServerConfig,
    pub store: Arc<UserStore>,
    pub presence: Presence,
    pub connections: Arc<ConnectionRegistry>,
    pub depot: Depot,
    pub pool: WorkerPool,
    pub translator: Arc<dyn Translator>,
}

/// The assembled server. `run` consumes it and loops forever.
pub struct Server {
    ctx: Arc<ServerContext>,
    mail_rx: Receiver<Mail>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Result<Self> {
        Self::with_translator(config, Arc::new(MyMemoryTranslator::new()))
    }

    pub fn with_translator(config: ServerConfig, translator: Arc<dyn Translator>) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(UserStore::open(&config.database_path)?);
        let (depot, mail_rx) = Depot::new();
        let pool = WorkerPool::new(config.workers);
        let ctx = Arc::new(ServerContext {
            config,
            store,
            presence: Presence::new(),
            connections: Arc::new(ConnectionRegistry::new()),
            depot,
            pool,
            translator,
        });
        Ok(Self { ctx, mail_rx })
    }

    /// Bind everything and serve until the process dies. Only a bind failure
    /// at startup is fatal.
    pub fn run(self) -> Result<()> {
        let reactor = Reactor::bind(Arc::clone(&self.ctx))?;
        let _registration =
            registration::spawn(self.ctx.config.registry_port, Arc::clone(&self.ctx.store))?;
        let _mailman = depot::spawn_mailman(self.mail_rx, Arc::clone(&self.ctx.connections));
        info!(
            "quizzlenet up: tcp {}, discovery {}, {} workers",
            self.ctx.config.tcp_port, self.ctx.config.udp_port, self.ctx.pool.size()
        );
        reactor.run()
    }
}

/// Builder in the usual shape.
pub struct ServerBuilder {
    config: ServerConfig,
    translator: Option<Arc<dyn Translator>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            translator: None,
        }
    }

    pub fn tcp_port(mut self, port: u16) -> Self {
        self.config.tcp_port = port;
        self
    }

    pub fn udp_port(mut self, port: u16) -> Self {
        self.config.udp_port = port;
        self
    }

    pub fn match_minutes(mut self, minutes: u64) -> Self {
        self.config.match_minutes = minutes;
        self
    }

    pub fn invitation_secs(mut self, secs: u64) -> Self {
        self.config.invitation_secs = secs;
        self
    }

    pub fn num_words(mut self, count: usize) -> Self {
        self.config.num_words = count;
        self
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.config.workers = count;
        self
    }

    pub fn registry_port(mut self, port: u16) -> Self {
        self.config.registry_port = port;
        self
    }

    pub fn dictionary(mut self, path: impl Into<String>) -> Self {
        self.config.dictionary_path = path.into();
        self
    }

    pub fn database(mut self, path: impl Into<String>) -> Self {
        self.config.database_path = path.into();
        self
    }

    pub fn translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn build(self) -> Result<Server> {
        match self.translator {
            Some(translator) => Server::with_translator(self.config, translator),
            None => Server::new(self.config),
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
