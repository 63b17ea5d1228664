use async_trait::async_trait;

pub const EULA_TITLE: &str = "End User License Agreement";
pub const EULA_QUESTION: &str = "Do you accept the EULA?";

/// Asks the person at the keyboard a yes/no question.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, title: &str, message: &str) -> bool;
}

/// Answers every prompt the same way. Handy for headless use.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

#[async_trait]
impl Confirm for FixedAnswer {
    async fn confirm(&self, title: &str, _message: &str) -> bool {
        tracing::debug!(%title, answer = self.0, "answering prompt without asking");
        self.0
    }
}
