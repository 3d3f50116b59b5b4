//! Scripted guest session

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wercker::execution::Cancellation;
use wercker::runtime::ContainerHandle;
use wercker::session::{CommandOutcome, Session, SessionConnector, SessionError};

/// One `send_checked` call as the session saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub commands: Vec<String>,
    /// Whether logs were visible while it ran
    pub visible: bool,
}

#[derive(Clone)]
enum Reply {
    Exit(i32),
    Transport,
}

struct Rule {
    pattern: String,
    reply: Reply,
}

struct Inner {
    sent: Mutex<Vec<Sent>>,
    visible: AtomicBool,
    rules: Mutex<Vec<Rule>>,
    delay: Mutex<Option<Duration>>,
}

/// Session that records every batch and answers from a rule list
///
/// Clones share the same record, so a test can keep one while the engine
/// owns another.
#[derive(Clone)]
pub struct MockSession {
    inner: Arc<Inner>,
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSession {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                sent: Mutex::new(Vec::new()),
                visible: AtomicBool::new(true),
                rules: Mutex::new(Vec::new()),
                delay: Mutex::new(None),
            }),
        }
    }

    /// Exit with `code` when any command in the batch contains `pattern`
    pub fn exit_when(self, pattern: &str, code: i32) -> Self {
        self.push_rule(pattern, Reply::Exit(code));
        self
    }

    /// Fail delivery when any command in the batch contains `pattern`
    pub fn break_when(self, pattern: &str) -> Self {
        self.push_rule(pattern, Reply::Transport);
        self
    }

    /// Sleep before answering each batch
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.inner.delay.lock().unwrap() = Some(delay);
        self
    }

    fn push_rule(&self, pattern: &str, reply: Reply) {
        self.inner.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            reply,
        });
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.inner.sent.lock().unwrap().clone()
    }

    /// Every command sent, flattened across batches
    pub fn commands(&self) -> Vec<String> {
        self.sent().into_iter().flat_map(|s| s.commands).collect()
    }

    fn reply_for(&self, commands: &[String]) -> Option<Reply> {
        let rules = self.inner.rules.lock().unwrap();
        rules
            .iter()
            .find(|rule| commands.iter().any(|c| c.contains(&rule.pattern)))
            .map(|rule| rule.reply.clone())
    }
}

#[async_trait]
impl Session for MockSession {
    async fn send_checked(&self, commands: &[String]) -> Result<CommandOutcome, SessionError> {
        let delay = *self.inner.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.inner.sent.lock().unwrap().push(Sent {
            commands: commands.to_vec(),
            visible: self.logs_visible(),
        });

        match self.reply_for(commands) {
            Some(Reply::Transport) => Err(SessionError::Closed),
            Some(Reply::Exit(code)) => Ok(CommandOutcome {
                exit_code: code,
                output: String::new(),
            }),
            None => Ok(CommandOutcome {
                exit_code: 0,
                output: String::new(),
            }),
        }
    }

    fn hide_logs(&self) {
        self.inner.visible.store(false, Ordering::SeqCst);
    }

    fn show_logs(&self) {
        self.inner.visible.store(true, Ordering::SeqCst);
    }

    fn logs_visible(&self) -> bool {
        self.inner.visible.load(Ordering::SeqCst)
    }
}

/// Connector handing out clones of one [`MockSession`]
pub struct MockConnector {
    pub session: MockSession,
    opened: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn new(session: MockSession) -> Self {
        Self {
            session,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Ids of the guests sessions were opened into
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn open(
        &self,
        guest: &ContainerHandle,
        _cancel: Cancellation,
    ) -> Result<Box<dyn Session>, SessionError> {
        self.opened.lock().unwrap().push(guest.id.clone());
        Ok(Box::new(self.session.clone()))
    }
}
