// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Values forwarded through a chain of stages, each adding one.
//!
//! `None` marks the end of the stream and is forwarded like a value.

use strand_rt::{Channel, Result};

pub fn run(stages: usize, items: usize) -> Result<()> {
    let sched = super::scheduler();
    let links: Vec<Channel<Option<u64>>> = (0..=stages).map(|_| sched.channel()).collect();

    let source = links[0].clone();
    sched
        .spawn(move |_| {
            source.send_sequence((1..=items as u64).map(Some))?;
            source.send(None)
        })?
        .set_name("source");

    for (idx, pair) in links.windows(2).enumerate() {
        let (input, output) = (pair[0].clone(), pair[1].clone());
        sched
            .spawn(move |_| loop {
                let item = input.receive()?;
                output.send(item.map(|v| v + 1))?;
                if item.is_none() {
                    return Ok(());
                }
            })?
            .set_name(format!("stage-{}", idx + 1));
    }

    let sink = links[stages].clone();
    sched
        .spawn(move |_| {
            let mut sum = 0;
            while let Some(v) = sink.receive()? {
                println!("item {}", v);
                sum += v;
            }
            println!("sum {}", sum);
            Ok(())
        })?
        .set_name("sink");

    sched.run()?;
    super::finish("pipeline", &sched)
}
