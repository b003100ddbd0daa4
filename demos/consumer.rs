//! Consumer-side walkthrough: registers a listener, then acquires and
//! releases a run of buffers a background producer thread flushes.
//!
//! As in `demos/producer.rs`, both sides live in the same process since this
//! crate models the IPC boundary rather than transporting across it.

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use surfacequeue::buffer::allocator::{usage, MockAllocator};
use surfacequeue::config::EngineConfig;
use surfacequeue::consumer::ConsumerSurface;
use surfacequeue::producer::ipc::{BufferClientProducer, LoopbackTransport};
use surfacequeue::queue::listeners::ConsumerListener;
use surfacequeue::SurfaceError;

struct FrameCounter(AtomicUsize);
impl ConsumerListener for FrameCounter {
    fn on_buffer_available(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

fn main() {
    surfacequeue::init_logging();

    let args: Vec<String> = env::args().collect();
    let frame_count: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(200);

    let consumer = Arc::new(ConsumerSurface::new(
        "demo-consumer-queue",
        Arc::new(MockAllocator::new()),
        EngineConfig::default(),
    ));
    let counter = Arc::new(FrameCounter(AtomicUsize::new(0)));
    consumer.register_consumer_listener(counter.clone());

    let client = Arc::new(BufferClientProducer::new(Arc::new(LoopbackTransport::new(consumer.producer()))));
    let producer_thread = std::thread::spawn(move || {
        for frame in 0..frame_count {
            let config = surfacequeue::RequestConfig {
                width: 1280,
                height: 720,
                format: 1,
                usage: usage::CPU_WRITE,
                ..Default::default()
            };
            let (sequence, ..) = client.request_buffer(config).expect("request_buffer");
            client
                .flush_buffer(
                    sequence,
                    Default::default(),
                    &surfacequeue::SyncFence::invalid(),
                    vec![],
                    frame as i64,
                    None,
                )
                .expect("flush_buffer");
        }
    });

    let start = Instant::now();
    let mut acquired = 0usize;
    while acquired < frame_count {
        match consumer.acquire_buffer() {
            Ok((sequence, fence, timestamp, _damages)) => {
                acquired += 1;
                if acquired % 50 == 0 {
                    println!("consumer: acquired frame {acquired} (seq {}, ts {timestamp})", sequence.0);
                }
                consumer.release_buffer(sequence, fence).expect("release_buffer");
            }
            Err(SurfaceError::NoBuffer) => std::thread::yield_now(),
            Err(e) => panic!("acquire_buffer failed: {e}"),
        }
    }
    producer_thread.join().expect("producer thread");

    println!(
        "consumer: drained {acquired} frames in {:.2?} ({} listener callbacks)",
        start.elapsed(),
        counter.0.load(Ordering::Relaxed)
    );
    println!("{}", consumer.dump());
}
