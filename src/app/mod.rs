// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Synchronised LED blink, riding on the tree as `{"blink": [r, g, b]}`
//! application frames.

use crate::error::Result;
use crate::node::{AppEvent, NodeHandle};

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Where blink colours end up; the LED strip on hardware.
pub trait LedSink: Send + Sync {
    fn set_colour(&self, rgb: [u8; 3]);
}

/// Led sink that just logs the colour.
pub struct LogLed;

impl LedSink for LogLed {
    fn set_colour(&self, rgb: [u8; 3]) {
        info!("LED switched to {rgb:?}");
    }
}

/// The blink application: applies every delivered colour, and can announce
/// its own to the whole mesh.
pub struct BlinkApp {
    handle: NodeHandle,
    led: Arc<dyn LedSink>,
    colour: [u8; 3],
}

impl BlinkApp {
    pub fn new(handle: NodeHandle, led: Arc<dyn LedSink>) -> Self {
        let colour = [
            rand::random::<u8>() % 250,
            rand::random::<u8>() % 250,
            rand::random::<u8>() % 250,
        ];
        Self {
            handle,
            led,
            colour,
        }
    }

    pub fn colour(&self) -> [u8; 3] {
        self.colour
    }

    /// Announces our colour to every node and applies it locally.
    pub async fn blink(&self) -> Result<()> {
        self.handle
            .send_to_all(json!({ "blink": self.colour }))
            .await?;
        self.led.set_colour(self.colour);
        Ok(())
    }

    /// Consumes delivered frames until the node is gone; with a period set,
    /// announces our own colour on that cadence too.
    pub async fn run(mut self, blink_every: Option<Duration>) -> Result<()> {
        let period = blink_every.unwrap_or(Duration::from_secs(365 * 24 * 3600));
        loop {
            match timeout(period, self.handle.next_app_event()).await {
                Ok(Some(event)) => self.apply(&event),
                Ok(None) => return Ok(()),
                Err(_) => self.blink().await?,
            }
        }
    }

    fn apply(&self, event: &AppEvent) {
        match blink_colour(&event.payload) {
            Some(colour) => {
                info!("blink from {}: {colour:?}", event.src);
                self.led.set_colour(colour);
            }
            None => trace!("frame from {} is not a blink", event.src),
        }
    }
}

/// Extracts the `[r, g, b]` of a blink payload, if that is what it is.
pub fn blink_colour(payload: &Value) -> Option<[u8; 3]> {
    let parts = payload.get("blink")?.as_array()?;
    if parts.len() != 3 {
        return None;
    }
    let mut colour = [0u8; 3];
    for (slot, part) in colour.iter_mut().zip(parts) {
        *slot = u8::try_from(part.as_u64()?).ok()?;
    }
    Some(colour)
}
