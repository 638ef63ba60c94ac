// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Two tasks bounce a counter over a pair of channels.

use strand_rt::Result;

pub fn run(rounds: usize) -> Result<()> {
    let sched = super::scheduler();
    let ping = sched.channel::<usize>();
    let pong = sched.channel::<usize>();

    let (tx, rx) = (ping.clone(), pong.clone());
    sched
        .spawn(move |_| {
            for n in 0..rounds {
                println!("ping {}", n);
                tx.send(n)?;
                let back = rx.receive()?;
                debug_assert_eq!(back, n + 1);
            }
            Ok(())
        })?
        .set_name("pinger");

    sched
        .spawn(move |_| {
            for _ in 0..rounds {
                let n = ping.receive()?;
                println!("pong {}", n + 1);
                pong.send(n + 1)?;
            }
            Ok(())
        })?
        .set_name("ponger");

    sched.run()?;
    super::finish("pingpong", &sched)
}
