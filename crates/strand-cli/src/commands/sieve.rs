// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Concurrent prime sieve: a generator feeds a growing chain of filters,
//! one per prime found. Main reads the head of the chain.

use strand_rt::{Channel, Result, Scheduler};

pub fn run(count: usize) -> Result<()> {
    let sched = super::scheduler();

    let numbers = sched.channel::<u64>();
    let tx = numbers.clone();
    sched
        .spawn(move |_| {
            for n in 2.. {
                tx.send(n)?;
            }
            Ok(())
        })?
        .set_name("generator");

    let mut head = numbers;
    for _ in 0..count {
        let prime = head.receive()?;
        println!("prime {}", prime);
        head = filter(&sched, head, prime)?;
    }

    super::finish("sieve", &sched)
}

/// Spawn a task passing on numbers from `input` not divisible by `prime`.
fn filter(sched: &Scheduler, input: Channel<u64>, prime: u64) -> Result<Channel<u64>> {
    let output = sched.channel::<u64>();
    let tx = output.clone();
    sched
        .spawn(move |_| loop {
            let n = input.receive()?;
            if n % prime != 0 {
                tx.send(n)?;
            }
        })?
        .set_name(format!("filter-{}", prime));
    Ok(output)
}
