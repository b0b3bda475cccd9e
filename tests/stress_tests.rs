use std::sync::mpsc;
use std::thread;

use rand::{thread_rng, Rng};

use magalloc::{free, malloc};

/// Fills an allocation with a marker byte and checks it survived intact
/// before handing the block back.
unsafe fn verify_and_free(ptr: *mut u8, size: usize, fill: u8) {
    for i in 0..size {
        assert_eq!(*ptr.add(i), fill, "clobbered byte {i} of a {size}-byte block");
    }
    free(ptr);
}

#[test]
fn stress_random_sizes() {
    let thread_count = 16;
    let mut handles = vec![];

    for seed in 0..thread_count {
        handles.push(thread::spawn(move || {
            let mut rng = thread_rng();
            let mut live: Vec<(usize, usize, u8)> = vec![];

            for round in 0_usize..10_000 {
                let size = rng.gen_range(1..=511);
                let ptr = malloc(size);
                assert!(!ptr.is_null());

                let fill = ((round as u8) ^ (seed as u8)) | 1;
                unsafe { std::ptr::write_bytes(ptr, fill, size) };
                live.push((ptr as usize, size, fill));

                // Cap the live set, freeing a random victim once it fills.
                if live.len() > 64 {
                    let victim = rng.gen_range(0..live.len());
                    let (ptr, size, fill) = live.swap_remove(victim);
                    unsafe { verify_and_free(ptr as *mut u8, size, fill) };
                }
            }

            for (ptr, size, fill) in live {
                unsafe { verify_and_free(ptr as *mut u8, size, fill) };
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked.");
    }
}

#[test]
fn stress_cross_thread_frees() {
    let producer_count = 8;
    let per_producer = 5_000;
    let (send, recv) = mpsc::channel::<(usize, usize, u8)>();

    let consumer = thread::spawn(move || {
        let mut freed = 0;
        while let Ok((ptr, size, fill)) = recv.recv() {
            unsafe { verify_and_free(ptr as *mut u8, size, fill) };
            freed += 1;
        }
        freed
    });

    let mut producers = vec![];
    for seed in 0..producer_count {
        let send = send.clone();
        producers.push(thread::spawn(move || {
            let mut rng = thread_rng();
            for round in 0..per_producer {
                let size = rng.gen_range(1..=511);
                let ptr = malloc(size);
                assert!(!ptr.is_null());

                let fill = ((round as u8) ^ (seed as u8)) | 1;
                unsafe { std::ptr::write_bytes(ptr, fill, size) };
                send.send((ptr as usize, size, fill)).unwrap();
            }
        }));
    }
    drop(send);

    for producer in producers {
        producer.join().expect("Thread panicked.");
    }
    let freed = consumer.join().expect("Thread panicked.");
    assert_eq!(freed, producer_count * per_producer);
}

#[test]
fn stress_steady_state_pairs() {
    let thread_count = 16;
    let mut handles = vec![];

    for _ in 0..thread_count {
        handles.push(thread::spawn(|| {
            // Paired allocate/free of one size should live entirely in the
            // thread cache after warm-up.
            for round in 0_usize..200_000 {
                let ptr = malloc(32);
                assert!(!ptr.is_null());
                unsafe {
                    std::ptr::write_bytes(ptr, round as u8, 32);
                    assert_eq!(*ptr.add(31), round as u8);
                    free(ptr);
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked.");
    }
}
