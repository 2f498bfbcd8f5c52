//! User-interaction surface consumed by the update coordinator.

use futures::future::BoxFuture;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogKind {
    Info,
    Question,
}

/// Modal confirmation with labeled buttons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialog {
    pub kind: DialogKind,
    pub title: String,
    pub message: String,
    pub detail: Option<String>,
    pub buttons: Vec<String>,
    /// Index reported when the dialog is dismissed without a choice.
    pub cancel_index: usize,
}

pub trait UserSurface: Send + Sync + 'static {
    /// Present `dialog` and resolve with the index of the chosen button.
    fn confirm(&self, dialog: Dialog) -> BoxFuture<'static, usize>;

    /// Fire-and-forget system notification.
    fn notify(&self, title: &str, body: &str);

    fn show_error(&self, title: &str, message: &str);
}
