//! Registers a repeating timeout and a priority-0 idle source, and lets
//! the timeout quit the loop after a few ticks. Run with:
//!
//! ```sh
//! RUST_LOG=trace cargo run --example basic --features log
//! ```

use revolve::MainLoop;

fn main() {
    env_logger::init();

    let main_loop = MainLoop::new();

    {
        let mut ticks = 0;
        main_loop.context().idle_add(move |_now| {
            ticks += 1;
            println!("idle tick {ticks}");
            ticks < 5
        });
    }

    {
        let main_loop = main_loop.clone();
        let mut ticks = 0;
        main_loop.context().timeout_add(200, move |_now| {
            ticks += 1;
            println!("timeout tick {ticks}");
            if ticks >= 3 {
                main_loop.quit();
                false
            } else {
                true
            }
        });
    }

    main_loop.run().unwrap();
}
