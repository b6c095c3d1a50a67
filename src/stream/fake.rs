//! Scripted in-memory transport for session tests.

use super::transport::{ChannelKind, StreamTransport};
use super::StreamError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub enum Step {
    Frame(String),
    /// Transport-level failure, then the connection is gone.
    Fail,
    /// Peer closes the connection.
    Close,
}

#[derive(Debug, Clone)]
pub enum Dial {
    /// Connection opens and plays the steps; afterwards it stays open and silent.
    Accept(Vec<Step>),
    Refuse,
    /// The dial never resolves.
    Hang,
}

#[derive(Debug, Default)]
pub struct Record {
    pub addresses: Vec<String>,
    pub sent: Vec<String>,
    pub disconnects: usize,
}

pub struct ScriptedTransport {
    channel: ChannelKind,
    dials: VecDeque<Dial>,
    current: Option<VecDeque<Step>>,
    record: Arc<Mutex<Record>>,
}

impl ScriptedTransport {
    pub fn new(channel: ChannelKind, dials: Vec<Dial>) -> (Self, Arc<Mutex<Record>>) {
        let record = Arc::new(Mutex::new(Record::default()));
        let transport = Self {
            channel,
            dials: dials.into(),
            current: None,
            record: record.clone(),
        };
        (transport, record)
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    fn channel(&self) -> ChannelKind {
        self.channel
    }

    fn is_open(&self) -> bool {
        self.current.is_some()
    }

    async fn connect(&mut self, address: &str) -> Result<(), StreamError> {
        self.current = None;
        self.record.lock().unwrap().addresses.push(address.to_string());
        match self.dials.pop_front() {
            Some(Dial::Accept(steps)) => {
                self.current = Some(steps.into());
                Ok(())
            }
            Some(Dial::Hang) => std::future::pending().await,
            Some(Dial::Refuse) | None => Err(StreamError::Connection(format!("{} refused", address))),
        }
    }

    async fn disconnect(&mut self) -> Result<(), StreamError> {
        if self.current.take().is_some() {
            self.record.lock().unwrap().disconnects += 1;
        }
        Ok(())
    }

    async fn send_text(&mut self, text: String) -> Result<(), StreamError> {
        if self.current.is_none() {
            return Err(StreamError::NotConnected);
        }
        if !self.channel.accepts_commands() {
            return Err(StreamError::Unsupported(self.channel));
        }
        self.record.lock().unwrap().sent.push(text);
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<String, StreamError>> {
        let steps = self.current.as_mut()?;
        match steps.pop_front() {
            Some(Step::Frame(text)) => Some(Ok(text)),
            Some(Step::Fail) => {
                self.current = None;
                Some(Err(StreamError::Connection("connection reset".to_string())))
            }
            Some(Step::Close) => {
                self.current = None;
                None
            }
            None => std::future::pending().await,
        }
    }
}
