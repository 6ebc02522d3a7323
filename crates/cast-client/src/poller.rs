//! Now-playing polls.
//!
//! The active-channel poll allows one outstanding request at a time; a tick
//! that finds a request still in flight is skipped.  The favorites poll fires
//! one independent request per channel and has no such guard, so slow
//! channels can have overlapping requests.  Neither cancels in-flight
//! requests; results are delivered to the core as events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cast_proto::protocol::ChannelId;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::core::CoreEvent;
use crate::metadata::MetadataClient;
use crate::scheduler::ScheduledTask;

/// Clears the in-flight flag however the request ends.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub fn spawn_active_poll<C: MetadataClient>(
    client: Arc<C>,
    channel: ChannelId,
    offset: u16,
    period: Duration,
    tx: mpsc::Sender<CoreEvent>,
) -> ScheduledTask {
    let in_flight = Arc::new(AtomicBool::new(false));
    ScheduledTask::every("active-poll", period, move || {
        if in_flight.swap(true, Ordering::AcqRel) {
            debug!("poller: {} still in flight, skipping tick", channel);
            return;
        }
        let guard = InFlightGuard(in_flight.clone());
        let client = client.clone();
        let channel = channel.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let _guard = guard;
            match client.now_playing(&channel, offset).await {
                Ok(response) => {
                    let _ = tx
                        .send(CoreEvent::ActiveNowPlaying {
                            channel,
                            offset,
                            response,
                        })
                        .await;
                }
                Err(e) => debug!("poller: active metadata for {} failed: {:#}", channel, e),
            }
        });
    })
}

/// One live (offset 0) request per favorite, each on its own task.
pub fn fetch_favorites<C: MetadataClient>(
    client: &Arc<C>,
    favorites: &[ChannelId],
    tx: &mpsc::Sender<CoreEvent>,
) {
    for channel in favorites {
        let client = client.clone();
        let channel = channel.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            match client.now_playing(&channel, 0).await {
                Ok(response) => {
                    let _ = tx
                        .send(CoreEvent::FavoriteNowPlaying { channel, response })
                        .await;
                }
                Err(e) => debug!("poller: favorite metadata for {} failed: {:#}", channel, e),
            }
        });
    }
}

/// Periodic favorites refresh over whatever list `favorites` holds at each tick.
pub fn spawn_favorites_poll<C: MetadataClient>(
    client: Arc<C>,
    favorites: watch::Receiver<Vec<ChannelId>>,
    period: Duration,
    tx: mpsc::Sender<CoreEvent>,
) -> ScheduledTask {
    ScheduledTask::every("favorites-poll", period, move || {
        let list = favorites.borrow().clone();
        fetch_favorites(&client, &list, &tx);
    })
}
