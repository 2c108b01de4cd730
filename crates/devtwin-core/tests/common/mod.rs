//! Shared helpers for integration tests

#![allow(dead_code)]

use devtwin_core::{props, PropertyMap, PropertyValue};
use std::sync::{Arc, Mutex};

/// Route library logs through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// `levels` nested maps under a single top-level key
pub fn nested(levels: usize) -> PropertyMap {
    let mut value = PropertyValue::from("leaf");
    for level in (1..=levels).rev() {
        value = PropertyValue::Map(props! { format!("level{level}") => value });
    }
    props! { "root" => value }
}

/// Records every diff handed to a callback
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<PropertyMap>>>,
}

impl Recorder {
    pub fn callback(&self) -> impl FnMut(&PropertyMap) -> anyhow::Result<()> + Send + 'static {
        let seen = Arc::clone(&self.seen);
        move |diff: &PropertyMap| {
            seen.lock().unwrap().push(diff.clone());
            Ok(())
        }
    }

    pub fn calls(&self) -> Vec<PropertyMap> {
        self.seen.lock().unwrap().clone()
    }
}
