use anyhow::Result;
use bird_dl::stream::{OverlappedProducer, DEFAULT_PREFETCH};
use futures::stream::TryStreamExt as _;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

#[test]
fn items_arrive_once_in_order() -> Result<()> {
    let producer = OverlappedProducer::spawn(0..100, 3)?;
    let items: Vec<usize> = producer.collect::<Result<_>>()?;
    assert_eq!(items, (0..100).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn empty_items_are_not_completion() -> Result<()> {
    let source = vec![vec![], vec![1], vec![]];
    let mut producer = OverlappedProducer::spawn(source, DEFAULT_PREFETCH)?;

    assert_eq!(producer.recv()?, Some(vec![]));
    assert_eq!(producer.recv()?, Some(vec![1]));
    assert_eq!(producer.recv()?, Some(vec![]));
    assert_eq!(producer.recv()?, None);
    assert_eq!(producer.recv()?, None);
    Ok(())
}

#[test]
fn buffer_is_bounded() -> Result<()> {
    let counter = Arc::new(AtomicUsize::new(0));
    let source = {
        let counter = counter.clone();
        (0..).map(move |index: usize| {
            counter.fetch_add(1, Ordering::SeqCst);
            index
        })
    };

    let mut producer = OverlappedProducer::spawn(source, 4)?;
    thread::sleep(Duration::from_millis(200));
    assert!(producer.num_ready() <= 4);
    assert!(counter.load(Ordering::SeqCst) <= 5);

    assert_eq!(producer.recv()?, Some(0));
    assert_eq!(producer.recv()?, Some(1));

    // the producer stops once the consumer is gone
    drop(producer);
    thread::sleep(Duration::from_millis(200));
    let produced = counter.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(counter.load(Ordering::SeqCst), produced);
    Ok(())
}

#[test]
fn producer_failure_is_reported() -> Result<()> {
    let source = (0..5).map(|index| {
        if index == 3 {
            panic!("source failure");
        }
        index
    });
    let mut producer = OverlappedProducer::spawn(source, 2)?;

    assert_eq!(producer.recv()?, Some(0));
    assert_eq!(producer.recv()?, Some(1));
    assert_eq!(producer.recv()?, Some(2));
    assert!(producer.recv().is_err());
    assert_eq!(producer.recv()?, None);
    Ok(())
}

#[test]
fn zero_capacity_is_rejected() {
    assert!(OverlappedProducer::spawn(0..1, 0).is_err());
}

#[tokio::test]
async fn stream_consumption() -> Result<()> {
    let producer = OverlappedProducer::spawn((0..20).map(|index| index * 2), 5)?;
    let items: Vec<i32> = producer.into_stream().try_collect().await?;
    assert_eq!(items, (0..20).map(|index| index * 2).collect::<Vec<_>>());
    Ok(())
}
