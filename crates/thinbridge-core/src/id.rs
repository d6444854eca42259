/// Generates correlation ids of the form `<session>.<counter>`.
///
/// The session token is random per generator, so two bridges (or a bridge
/// restarted in the same process) never hand out the same id.
#[derive(Debug)]
pub struct IdGenerator {
    session: String,
    counter: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::with_session(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn with_session(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            counter: 0,
        }
    }

    pub fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("{}.{}", self.session, self.counter)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
