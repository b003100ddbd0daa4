//! Consumers don't get a blocking `acquire_buffer`: a flush notifies
//! `ConsumerListener::on_buffer_available`, and it is the caller's job to
//! turn that callback into a blocking wait if that's the style it wants.
//! This demo wires the callback to a condvar and blocks on it, showing the
//! producer's flush (delayed here) is what wakes the waiting consumer up.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use surfacequeue::buffer::allocator::{usage, MockAllocator};
use surfacequeue::config::EngineConfig;
use surfacequeue::consumer::ConsumerSurface;
use surfacequeue::producer::ipc::{BufferClientProducer, LoopbackTransport};
use surfacequeue::queue::listeners::ConsumerListener;

struct Doorbell {
    available: Mutex<bool>,
    condvar: Condvar,
}

impl ConsumerListener for Doorbell {
    fn on_buffer_available(&self) {
        *self.available.lock().unwrap() = true;
        self.condvar.notify_one();
    }
}

impl Doorbell {
    fn wait(&self, timeout: Duration) -> bool {
        let mut available = self.available.lock().unwrap();
        if !*available {
            let (guard, result) = self
                .condvar
                .wait_timeout_while(available, timeout, |available| !*available)
                .unwrap();
            available = guard;
            if result.timed_out() {
                return false;
            }
        }
        *available = false;
        true
    }
}

fn main() {
    surfacequeue::init_logging();

    let consumer = ConsumerSurface::new("demo-blocking-queue", Arc::new(MockAllocator::new()), EngineConfig::default());
    let doorbell = Arc::new(Doorbell {
        available: Mutex::new(false),
        condvar: Condvar::new(),
    });
    consumer.register_consumer_listener(doorbell.clone());
    let client = BufferClientProducer::new(Arc::new(LoopbackTransport::new(consumer.producer())));

    let delay = Duration::from_millis(500);
    std::thread::spawn(move || {
        std::thread::sleep(delay);
        let config = surfacequeue::RequestConfig {
            width: 640,
            height: 480,
            format: 1,
            usage: usage::CPU_WRITE,
            ..Default::default()
        };
        let (sequence, ..) = client.request_buffer(config).expect("request_buffer");
        client
            .flush_buffer(sequence, Default::default(), &surfacequeue::SyncFence::invalid(), vec![], 0, None)
            .expect("flush_buffer");
    });

    println!("consumer: waiting on the doorbell, expecting it to ring after ~{delay:?}");
    let start = Instant::now();
    if !doorbell.wait(Duration::from_secs(5)) {
        panic!("timed out waiting for a flush");
    }
    let (sequence, fence, ..) = consumer.acquire_buffer().expect("acquire_buffer");
    println!("consumer: acquired sequence {} after {:?}", sequence.0, start.elapsed());
    consumer.release_buffer(sequence, fence).expect("release_buffer");
}
