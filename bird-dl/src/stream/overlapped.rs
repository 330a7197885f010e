use crate::common::*;

/// The default number of prepared items buffered ahead of the consumer.
pub const DEFAULT_PREFETCH: usize = 10;

/// The message passed from the producer thread to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ProducerMessage<T> {
    Item(T),
    /// The source is exhausted.
    Done,
}

/// Runs an iterator on a background thread and buffers a bounded number of
/// its items.
///
/// The producer blocks when the buffer is full and the consumer blocks when
/// it is empty. Dropping the consumer stops the producer at its next send.
/// The thread is detached and never joined.
#[derive(Debug)]
pub struct OverlappedProducer<T> {
    rx: flume::Receiver<ProducerMessage<T>>,
    finished: bool,
}

impl<T> OverlappedProducer<T>
where
    T: 'static + Send,
{
    pub fn spawn<I>(source: I, capacity: usize) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: 'static + Send,
    {
        ensure!(capacity > 0, "the producer capacity must be positive");

        let (tx, rx) = flume::bounded(capacity);
        let iter = source.into_iter();

        thread::Builder::new()
            .name("batch-producer".into())
            .spawn(move || {
                for item in iter {
                    if tx.send(ProducerMessage::Item(item)).is_err() {
                        debug!("consumer is gone, stop producing");
                        return;
                    }
                }
                let _ = tx.send(ProducerMessage::Done);
            })
            .with_context(|| "failed to spawn the producer thread")?;

        Ok(Self {
            rx,
            finished: false,
        })
    }
}

impl<T> OverlappedProducer<T> {
    /// The number of items ready to be received.
    pub fn num_ready(&self) -> usize {
        self.rx.len()
    }

    /// Receive the next item, or `None` once the source is exhausted.
    ///
    /// It fails if the producer stopped without completing, for example when
    /// the source panicked.
    pub fn recv(&mut self) -> Result<Option<T>> {
        if self.finished {
            return Ok(None);
        }
        let msg = self.rx.recv();
        self.handle(msg.ok())
    }

    pub async fn recv_async(&mut self) -> Result<Option<T>> {
        if self.finished {
            return Ok(None);
        }
        let msg = self.rx.recv_async().await;
        self.handle(msg.ok())
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<T>>
    where
        T: 'static + Send,
    {
        stream::unfold(self, |mut producer| async move {
            let item = producer.recv_async().await.transpose()?;
            Some((item, producer))
        })
    }

    fn handle(&mut self, msg: Option<ProducerMessage<T>>) -> Result<Option<T>> {
        match msg {
            Some(ProducerMessage::Item(item)) => Ok(Some(item)),
            Some(ProducerMessage::Done) => {
                self.finished = true;
                Ok(None)
            }
            None => {
                self.finished = true;
                bail!("the producer terminated before completion")
            }
        }
    }
}

impl<T> Iterator for OverlappedProducer<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv().transpose()
    }
}
