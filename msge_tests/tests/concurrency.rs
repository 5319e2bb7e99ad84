//! Decode-and-swap racing against render-style reads of the shared manager.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
};

use msge_shared::{
    component::{Component, RotateOverTime},
    ecs::{Entity, EntityManager},
    math::Vec3,
    snapshot::{decode_and_swap, encode_world},
};

/// A world of `n` entities all tagged `tag` and placed at `x`.
fn world(tag: &str, n: usize, x: f32) -> Vec<u8> {
    let mut m = EntityManager::new();
    for _ in 0..n {
        let mut e = Entity::new(tag);
        e.replicate = true;
        e.transform.translation = Vec3::new(x, 0.0, 0.0);
        e.add_component(Component::RotateOverTime(RotateOverTime {
            radians_per_sec: Vec3::new(0.0, 0.0, x),
        }))
        .unwrap();
        m.insert(e);
    }
    encode_world(&m).to_vec()
}

#[test]
fn readers_never_observe_a_torn_manager() {
    let worlds = Arc::new([world("a", 3, 1.0), world("b", 5, 2.0)]);
    let shared = Arc::new(Mutex::new(EntityManager::new()));
    decode_and_swap(&shared, &worlds[0]).unwrap();

    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..2)
        .map(|w| {
            let shared = shared.clone();
            let worlds = worlds.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    let snapshot = &worlds[(i + w) % 2];
                    decode_and_swap(&shared, snapshot).unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let shared = shared.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut observed = 0u64;
                loop {
                    let finished = done.load(Ordering::Acquire);
                    let m = shared.lock().unwrap();
                    let tags: Vec<&str> = m.iter().map(|e| e.tag.as_str()).collect();
                    let (tag, count, x) = match tags.first() {
                        Some(&"a") => ("a", 3, 1.0),
                        Some(&"b") => ("b", 5, 2.0),
                        other => panic!("unexpected first tag {other:?}"),
                    };
                    assert_eq!(m.len(), count, "entity count from a mixed world");
                    for e in m.iter() {
                        assert_eq!(e.tag, tag, "tags from two worlds at once");
                        assert_eq!(e.transform.translation.x, x);
                        assert_eq!(e.components().len(), 1);
                    }
                    observed += 1;
                    if finished {
                        break observed;
                    }
                }
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }
    done.store(true, Ordering::Release);
    for r in readers {
        assert!(r.join().unwrap() > 0);
    }
}
