//! Utilities for testing downloads
use crate::handler::ObjectHandler;
use crate::object::RemoteObject;
use async_trait::async_trait;
use httptest::matchers::{ExecutionContext, Matcher};
use std::fmt;
use std::sync::{Arc, Mutex};

/// An httptest matcher that logs the matched value with `dbg!()` and always matches.
pub(crate) struct Dbg;
impl<IN> Matcher<IN> for Dbg
where
    IN: fmt::Debug + ?Sized,
{
    fn matches(&mut self, input: &IN, _ctx: &mut ExecutionContext) -> bool {
        dbg!(input);
        true
    }

    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Dbg()")
    }
}

/// Event log, used to record events from various places and then assert on them.
#[derive(Default, Clone)]
pub(crate) struct EventLog {
    logged: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub(crate) fn log<S: Into<String>>(&self, message: S) {
        self.logged.lock().unwrap().push(message.into())
    }

    pub(crate) fn snapshot(&self) -> Vec<String> {
        self.logged.lock().unwrap().clone()
    }

    pub(crate) fn assert(&self, expected: Vec<String>) {
        assert_eq!(*self.logged.lock().unwrap(), expected);
    }
}

/// A handler that reads each object fully and logs `object <position_id> <key> <contents>`,
/// then `complete`.
pub(crate) struct RecordingHandler {
    pub(crate) log: EventLog,
    pub(crate) objects: usize,
}

impl RecordingHandler {
    pub(crate) fn new(log: EventLog) -> Self {
        Self { log, objects: 0 }
    }
}

#[async_trait]
impl ObjectHandler for RecordingHandler {
    async fn handle_object(&mut self, object: RemoteObject) {
        let position_id = object.position_id();
        let key = object.key().to_owned();
        let data = object.into_vec().unwrap();
        self.objects += 1;
        self.log.log(format!(
            "object {} {} {}",
            position_id,
            key,
            String::from_utf8_lossy(&data)
        ));
    }

    async fn on_complete(&mut self) {
        self.log.log("complete");
    }
}
