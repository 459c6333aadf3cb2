//! Many threads allocating from one Loft and freeing each other's blocks.

use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use saavy_rt::loft::{HeapProvider, Loft, LoftConfig, LoftPtr, MINIMUM_HUGEPAGE};

const THREADS: usize = 4;
const ALLOCATIONS: usize = 20_000;
const MAX_SIZE: usize = 4096;

/// Stamp the first word of a block with its owner tag.
fn stamp(block: &mut LoftPtr<'_>, tag: u64) {
    unsafe { block.as_ptr().cast::<u64>().write(tag) };
}

fn read_stamp(block: &LoftPtr<'_>) -> u64 {
    unsafe { block.as_ptr().cast::<u64>().read() }
}

fn run_worker<'a>(
    loft: &'a Loft,
    index: usize,
    peers: &[Sender<(u64, LoftPtr<'a>)>],
    inbox: Receiver<(u64, LoftPtr<'a>)>,
) -> usize {
    let mut rng = StdRng::seed_from_u64(0x5eed + index as u64);
    let mut freed = 0;
    let mut check = |(tag, block): (u64, LoftPtr<'a>)| {
        // a block handed out twice would carry someone else's stamp
        assert_eq!(read_stamp(&block), tag);
        drop(block);
        freed += 1;
    };
    for seq in 0..ALLOCATIONS {
        let size = rng.gen_range(0..=MAX_SIZE);
        let mut block = loft.alloc(size, 8).expect("arena growth");
        assert!(block.size() >= size.max(1));
        assert_eq!(block.as_ptr() as usize % 64, 0);
        let tag = ((index as u64) << 32) | seq as u64;
        stamp(&mut block, tag);

        let peer = &peers[rng.gen_range(0..peers.len())];
        peer.send((tag, block)).expect("peer inbox");
        while let Ok(item) = inbox.try_recv() {
            check(item);
        }
    }
    freed
}

#[test]
fn random_cross_thread_frees_keep_stats_consistent() {
    let _ = env_logger::builder().is_test(true).try_init();
    let loft = Loft::new(Box::new(HeapProvider));
    loft.set_config(&LoftConfig {
        preallocate: 8 * MINIMUM_HUGEPAGE,
        watermark: MINIMUM_HUGEPAGE,
        ..LoftConfig::default()
    });
    loft.grow_preallocate(0);

    let (senders, receivers): (Vec<_>, Vec<_>) = (0..THREADS).map(|_| channel::unbounded()).unzip();
    let freed: usize = thread::scope(|scope| {
        let handles: Vec<_> = receivers
            .iter()
            .enumerate()
            .map(|(index, inbox)| {
                let (loft, senders, inbox) = (&loft, senders.clone(), inbox.clone());
                scope.spawn(move || run_worker(loft, index, &senders, inbox))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });
    drop(senders);
    // whatever arrived after a worker stopped listening
    let mut leftover = 0;
    for (tag, block) in receivers.iter().flat_map(|inbox| inbox.try_iter()) {
        assert_eq!(read_stamp(&block), tag);
        leftover += 1;
    }
    assert_eq!(freed + leftover, THREADS * ALLOCATIONS);

    let stats = loft.stats();
    assert!(stats.available <= stats.allocated, "{stats}");
    assert!(stats.maxchunk <= stats.allocated, "{stats}");
    assert!(stats.narenas >= 1);
    // everything is back in the free lists
    assert!(stats.in_free_lists() + stats.available <= stats.allocated);
    assert!(stats.in_free_lists() > 0);
}

#[test]
fn global_pool_serves_threads() {
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(t as u64);
                let blocks: Vec<_> = (0..500)
                    .map(|_| saavy_rt::loft::alloc(rng.gen_range(1..=MAX_SIZE), 16).unwrap())
                    .collect();
                blocks.len()
            })
        })
        .collect();
    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, THREADS * 500);
    let stats = saavy_rt::loft::get_stats();
    assert!(stats.available <= stats.allocated);
    assert!(stats.maxchunk <= stats.allocated);
}
