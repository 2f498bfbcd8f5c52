/// The main application window as the host tracks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationWindow {
    pub id: u32,
    pub title: String,
    pub visible: bool,
    pub focused: bool,
    pub minimized: bool,
}

/// Owns at most one main window; closing it drops the window, `activate`
/// recreates it.
#[derive(Debug)]
pub struct WindowHost {
    base_title: String,
    current: Option<ApplicationWindow>,
    progress: Option<u8>,
    next_id: u32,
}

impl WindowHost {
    pub fn new(base_title: impl Into<String>) -> Self {
        Self {
            base_title: base_title.into(),
            current: None,
            progress: None,
            next_id: 1,
        }
    }

    pub fn create(&mut self) -> &ApplicationWindow {
        let id = self.next_id;
        self.next_id += 1;
        let title = title_for(&self.base_title, self.progress);
        self.current.insert(ApplicationWindow {
            id,
            title,
            visible: true,
            focused: true,
            minimized: false,
        })
    }

    /// Recreate the window when none is open. Returns true if one was created.
    pub fn activate(&mut self) -> bool {
        if self.current.is_some() {
            return false;
        }
        self.create();
        true
    }

    /// Close the window. Returns true when this left no window open.
    pub fn close(&mut self) -> bool {
        match self.current.take() {
            Some(w) => {
                tracing::debug!(id = w.id, "main window closed");
                true
            }
            None => false,
        }
    }

    /// Restore and focus the existing window; used when a second instance starts.
    pub fn focus_existing(&mut self) -> bool {
        match self.current.as_mut() {
            Some(w) => {
                w.minimized = false;
                w.visible = true;
                w.focused = true;
                true
            }
            None => false,
        }
    }

    /// Mirror download progress in the title. Returns the new title when a window is open.
    pub fn set_progress(&mut self, progress: Option<u8>) -> Option<String> {
        self.progress = progress;
        let title = title_for(&self.base_title, progress);
        let w = self.current.as_mut()?;
        w.title = title;
        Some(w.title.clone())
    }
}

fn title_for(base: &str, progress: Option<u8>) -> String {
    match progress {
        Some(pct) => format!("{base} (downloading update {pct}%)"),
        None => base.to_string(),
    }
}
