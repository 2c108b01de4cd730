//! Change callbacks
//!
//! One optional listener per section. Listeners receive a private copy of the
//! diff after the change has been applied.

use crate::error::{Result, TwinError};
use crate::value::PropertyMap;
use std::fmt;
use tracing::debug;

/// Listener invoked with the fields that changed in one call
pub type ChangeCallback = Box<dyn FnMut(&PropertyMap) -> anyhow::Result<()> + Send>;

/// Twin section a diff belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Desired,
    Reported,
    Tags,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Desired => write!(f, "desired"),
            Self::Reported => write!(f, "reported"),
            Self::Tags => write!(f, "tags"),
        }
    }
}

/// Single-slot callback registry for the three sections
#[derive(Default)]
pub struct CallbackDispatcher {
    desired: Option<ChangeCallback>,
    reported: Option<ChangeCallback>,
    tags: Option<ChangeCallback>,
}

impl CallbackDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the listener for `section`; `None` clears it.
    pub fn set(&mut self, section: Section, callback: Option<ChangeCallback>) {
        *self.slot(section) = callback;
    }

    pub fn is_set(&self, section: Section) -> bool {
        match section {
            Section::Desired => self.desired.is_some(),
            Section::Reported => self.reported.is_some(),
            Section::Tags => self.tags.is_some(),
        }
    }

    /// Hand `diff` to the listener for `section`. Empty diffs are not delivered.
    pub fn dispatch(&mut self, section: Section, diff: &PropertyMap) -> Result<()> {
        if diff.is_empty() {
            return Ok(());
        }
        let Some(callback) = self.slot(section).as_mut() else {
            return Ok(());
        };
        debug!(%section, changed = diff.len(), "notifying change listener");
        let copy = diff.clone();
        callback(&copy).map_err(TwinError::Callback)
    }

    fn slot(&mut self, section: Section) -> &mut Option<ChangeCallback> {
        match section {
            Section::Desired => &mut self.desired,
            Section::Reported => &mut self.reported,
            Section::Tags => &mut self.tags,
        }
    }
}

impl fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackDispatcher")
            .field("desired", &self.desired.is_some())
            .field("reported", &self.reported.is_some())
            .field("tags", &self.tags.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_dispatch_to_registered_section() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut dispatcher = CallbackDispatcher::new();
        dispatcher.set(
            Section::Desired,
            Some(Box::new(move |diff: &PropertyMap| {
                sink.lock().unwrap().push(diff.clone());
                Ok(())
            })),
        );

        dispatcher.dispatch(Section::Desired, &props! { "a" => 1 }).unwrap();
        dispatcher.dispatch(Section::Desired, &PropertyMap::new()).unwrap();
        dispatcher.dispatch(Section::Reported, &props! { "b" => 2 }).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![props! { "a" => 1 }]);
    }

    #[test]
    fn test_clear_and_failure() {
        let mut dispatcher = CallbackDispatcher::new();
        dispatcher.set(
            Section::Tags,
            Some(Box::new(|_: &PropertyMap| Err(anyhow::anyhow!("listener gone")))),
        );
        let err = dispatcher.dispatch(Section::Tags, &props! { "t" => 1 }).unwrap_err();
        assert!(matches!(err, TwinError::Callback(_)));

        dispatcher.set(Section::Tags, None);
        assert!(!dispatcher.is_set(Section::Tags));
        assert!(dispatcher.dispatch(Section::Tags, &props! { "t" => 1 }).is_ok());
    }
}
