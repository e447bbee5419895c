//! Basic circuit breaker usage: tripping, rejection with fallback, recovery.
//!
//! Run with: cargo run --example basic

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tripswitch::{CallOptions, CircuitBreaker, CircuitError};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let breaker = Arc::new(
        CircuitBreaker::builder("flaky_api")
            .failure_rate_threshold(50.0)
            .count_window(4)
            .minimum_calls(4)
            .wait_duration_secs(1.0)
            .half_open_permits(2)
            .on_open(|name| println!("[hook] circuit '{name}' opened"))
            .on_half_open(|name| println!("[hook] circuit '{name}' probing recovery"))
            .on_close(|name| println!("[hook] circuit '{name}' closed"))
            .build()?,
    );

    // A downstream that fails for a while, then recovers.
    let attempts = Arc::new(AtomicUsize::new(0));
    let downstream = {
        let attempts = Arc::clone(&attempts);
        move || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 4 {
                Err(format!("attempt {n}: connection refused"))
            } else {
                Ok(format!("attempt {n}: 200 OK"))
            }
        }
    };

    println!("--- failing traffic ---");
    for _ in 0..4 {
        match breaker.call(downstream.clone()) {
            Ok(body) => println!("success: {body}"),
            Err(CircuitError::Execution(e)) => println!("downstream error: {e}"),
            Err(e) => println!("rejected: {e}"),
        }
    }

    println!("--- circuit open: calls are rejected fast ---");
    let result = breaker.call((
        downstream.clone(),
        CallOptions::new().with_fallback(|ctx| {
            Ok(format!("cached response (circuit '{}' is {})", ctx.circuit_name, ctx.state))
        }),
    ));
    match result {
        Ok(body) => println!("fallback: {body}"),
        Err(e) => println!("error: {e}"),
    }

    println!("--- waiting for the open interval to elapse ---");
    std::thread::sleep(std::time::Duration::from_millis(1100));

    println!("--- trial calls probe the recovered downstream ---");
    for _ in 0..2 {
        match breaker.call(downstream.clone()) {
            Ok(body) => println!("success: {body}"),
            Err(e) => println!("error: {e}"),
        }
    }

    println!("final state: {}", breaker.state());
    Ok(())
}
