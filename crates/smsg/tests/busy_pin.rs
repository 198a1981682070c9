//! Teardown-safety stress: interleaves the notification upcall with close.
//!
//! The channel must never be recycled while a delivery is mid-flight; close
//! finalises only after the last busy pin is released, and no callback runs
//! after close has returned.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use smsg::{
    ChanState, Endpoint, EndpointConfig, NoopDoorbell, NoopPower, Role, SharedRegion, Smsg,
    Timeout, SHM_WINDOW_SIZE,
};

const CHANNEL: u8 = 3;

fn wait_for_state(endpoint: &Endpoint, state: ChanState) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while endpoint.channel_stats(CHANNEL).unwrap().state != state {
        assert!(Instant::now() < deadline, "timed out waiting for {state:?}");
        thread::yield_now();
    }
}

#[test]
fn close_finalises_only_after_inflight_deliveries() {
    let region = Arc::new(SharedRegion::new_zeroed(SHM_WINDOW_SIZE, 64).expect("region"));
    let peer = smsg_ring::ShmLayout::for_role(Role::Client, &region).expect("peer layout");
    let inject = smsg_ring::Ring::new(Arc::clone(&region), peer.tx).expect("inject ring");
    let drain = smsg_ring::Ring::new(Arc::clone(&region), peer.rx).expect("drain ring");

    let endpoint = Endpoint::new(
        EndpointConfig {
            name: "pinned".to_string(),
            role: Role::Host,
            channels: vec![CHANNEL],
            dst_high_offset: 0,
        },
        region,
        Arc::new(NoopDoorbell),
        Arc::new(NoopPower),
    )
    .expect("endpoint");

    // Slow callback widens the window in which close could race a delivery.
    let callback_runs = Arc::new(AtomicU32::new(0));
    {
        let callback_runs = Arc::clone(&callback_runs);
        endpoint
            .register_callback(CHANNEL, move |_msg| {
                thread::sleep(Duration::from_micros(200));
                callback_runs.fetch_add(1, Ordering::SeqCst);
            })
            .expect("register");
    }

    // Only this thread ever pops the inbound ring; the upcall context is
    // serialised on hardware too.
    let stop = Arc::new(AtomicBool::new(false));
    let demux = {
        let endpoint = Arc::clone(&endpoint);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                endpoint.on_notified();
                thread::yield_now();
            }
            endpoint.on_notified();
        })
    };

    for round in 0..100u32 {
        // Peer connects first; open then completes without waiting.
        while !inject.try_push(Smsg::open(CHANNEL).to_bits()) {
            thread::yield_now();
        }
        wait_for_state(&endpoint, ChanState::ClientOpened);
        endpoint.open(CHANNEL, Timeout::None).expect("open");

        for value in 0..40u32 {
            while !inject.try_push(Smsg::data(CHANNEL, round * 100 + value).to_bits()) {
                thread::yield_now();
            }
        }

        // Close races the deliveries still being fanned in above.
        endpoint.close(CHANNEL, Timeout::None).expect("close");
        assert_eq!(
            endpoint.channel_stats(CHANNEL).unwrap().state,
            ChanState::Unused
        );

        // No delivery may land after close has finalised the slot.
        let settled = callback_runs.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(2));
        assert_eq!(callback_runs.load(Ordering::SeqCst), settled);

        while drain.try_pop().is_some() {}
    }

    stop.store(true, Ordering::Release);
    demux.join().unwrap();
}
