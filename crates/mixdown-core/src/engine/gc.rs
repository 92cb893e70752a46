//! Deferred deallocation of decoded stem audio
//!
//! Decoded stems are held in `basedrop::Shared<T>` instead of `Arc<T>`. When
//! the last reference goes away the allocation is only enqueued, and the
//! `audio-gc` thread frees it on its next pass. Whichever thread drops a
//! stem (the mixer thread included) never pays for a multi-hundred megabyte
//! `munmap`.
//!
//! The collector thread logs every pass that reclaims something, with the
//! number of stem buffers still alive, which makes leaked PCM (a stem
//! removed from the session but still referenced) visible at `debug` level.
//!
//! ```ignore
//! use basedrop::Shared;
//! use crate::engine::gc::gc_handle;
//!
//! let pcm = Shared::new(&gc_handle(), decoded_samples);
//! ```

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// How often the collector thread reclaims queued allocations
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

/// Collector loop; never returns
fn run_collector(mut collector: Collector) {
    log::info!("Audio GC thread started");
    let mut live = collector.alloc_count();

    loop {
        collector.collect();

        let now_live = collector.alloc_count();
        if now_live < live {
            log::debug!(
                "Audio GC: reclaimed {} buffer(s), {} still alive",
                live - now_live,
                now_live
            );
        }
        live = now_live;

        thread::sleep(COLLECT_INTERVAL);
    }
}

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("audio-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, it has to live on this thread
            let collector = Collector::new();
            if tx.send(collector.handle()).is_err() {
                return;
            }
            run_collector(collector);
        })
        .expect("Failed to spawn audio GC thread");

    rx.recv().expect("Failed to receive GC handle")
}

/// Handle for creating `Shared<T>` allocations reclaimed off the audio path
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Shared;

    /// Reports the name of the thread it is dropped on
    struct DropReporter(mpsc::Sender<Option<String>>);

    impl Drop for DropReporter {
        fn drop(&mut self) {
            let _ = self.0.send(thread::current().name().map(str::to_string));
        }
    }

    #[test]
    fn test_shared_values_are_readable_across_threads() {
        let pcm = Shared::new(&gc_handle(), vec![1i16, -2, 3, -4]);
        let clone = Shared::clone(&pcm);
        let sum = thread::spawn(move || clone.iter().map(|&s| s as i32).sum::<i32>())
            .join()
            .unwrap();
        assert_eq!(sum, -2);
        drop(pcm);
    }

    #[test]
    fn test_last_drop_is_freed_on_the_gc_thread() {
        let (tx, rx) = mpsc::channel();
        let shared = Shared::new(&gc_handle(), DropReporter(tx));
        let clone = Shared::clone(&shared);
        drop(shared);
        drop(clone);

        let dropped_on = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("value was never reclaimed");
        assert_eq!(dropped_on.as_deref(), Some("audio-gc"));
    }
}
