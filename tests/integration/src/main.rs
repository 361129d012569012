//! Integration Test Harness
//!
//! Runs every integration test category and prints a summary.
//!
//! # Usage
//!
//! Run all tests:
//! ```text
//! cargo run -p integration-tests
//! ```
//!
//! Run specific test categories:
//! ```text
//! cargo test -p integration-tests --test remote_invocation_tests
//! cargo test -p integration-tests --test fragmentation_tests
//! cargo test -p integration-tests --test collocation_tests
//! cargo test -p integration-tests --test servant_manager_tests
//! cargo test -p integration-tests --test lifecycle_tests
//! cargo test -p integration-tests --test forward_tests
//! cargo test -p integration-tests --test stress_tests
//! ```

use std::process::Command;
use std::time::{Duration, Instant};

/// Test category
#[derive(Debug, Clone)]
struct TestCategory {
    name: &'static str,
    description: &'static str,
    test_name: &'static str,
}

const TEST_CATEGORIES: &[TestCategory] = &[
    TestCategory {
        name: "Remote Invocation",
        description: "Calls between two ORBs over loopback IIOP",
        test_name: "remote_invocation_tests",
    },
    TestCategory {
        name: "Fragmentation",
        description: "Large messages, GIOP 1.0/1.1/1.2 and size limits",
        test_name: "fragmentation_tests",
    },
    TestCategory {
        name: "Collocation",
        description: "In-process calls through the object adapter",
        test_name: "collocation_tests",
    },
    TestCategory {
        name: "Servant Managers",
        description: "Activators, locators and default servants",
        test_name: "servant_manager_tests",
    },
    TestCategory {
        name: "Lifecycle",
        description: "Managers, adapter destruction, references and shutdown",
        test_name: "lifecycle_tests",
    },
    TestCategory {
        name: "Location Forward",
        description: "Following LOCATION_FORWARD replies",
        test_name: "forward_tests",
    },
    TestCategory {
        name: "Stress",
        description: "Many clients, activation churn, oneway floods",
        test_name: "stress_tests",
    },
];

fn print_banner() {
    println!("{}", "=".repeat(80));
    println!("  MateCORBA Integration Test Suite");
    println!("{}", "=".repeat(80));
}

fn print_test_categories() {
    println!("Test Categories:");
    println!("{}", "-".repeat(80));
    for (i, cat) in TEST_CATEGORIES.iter().enumerate() {
        println!("  {}. {} - {}", i + 1, cat.name, cat.description);
    }
    println!("{}", "-".repeat(80));
    println!();
}

fn run_test_category(category: &TestCategory) -> (bool, Duration, String) {
    println!("\n{}", "=".repeat(80));
    println!("Running: {}", category.name);
    println!("{}", "=".repeat(80));

    let start = Instant::now();

    let output = Command::new("cargo")
        .args(["test", "-p", "integration-tests", "--test", category.test_name, "--", "--nocapture"])
        .output();

    let duration = start.elapsed();

    match output {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);

            if !stdout.is_empty() {
                println!("{}", stdout);
            }
            if !stderr.is_empty() {
                eprintln!("{}", stderr);
            }

            let success = output.status.success();
            let summary = if success {
                "PASSED".to_string()
            } else {
                format!("FAILED (exit code: {:?})", output.status.code())
            };

            (success, duration, summary)
        }
        Err(e) => (false, duration, format!("Failed to execute: {}", e)),
    }
}

fn main() {
    print_banner();
    print_test_categories();

    let total_start = Instant::now();
    let mut results = Vec::new();

    for category in TEST_CATEGORIES {
        let (success, duration, summary) = run_test_category(category);
        results.push((category.name, success, duration, summary));
    }

    let total_duration = total_start.elapsed();

    println!("\n{}", "=".repeat(80));
    println!("FINAL SUMMARY");
    println!("{}", "=".repeat(80));

    let passed = results.iter().filter(|(_, s, _, _)| *s).count();
    let failed = results.len() - passed;

    println!("\nCategories: {} | Passed: {} | Failed: {}", results.len(), passed, failed);
    println!("Total Duration: {:?}", total_duration);
    println!();

    println!("{:<30} {:<10} {:<15} {}", "Category", "Status", "Duration", "Details");
    println!("{}", "-".repeat(80));

    for (name, success, duration, summary) in &results {
        let status = if *success { "PASS" } else { "FAIL" };
        println!("{:<30} {:<10} {:<15?} {}", name, status, duration, summary);
    }

    println!("{}", "=".repeat(80));

    if failed > 0 {
        println!("\nSome tests failed!");
        std::process::exit(1);
    }
    println!("\nAll tests passed!");
}
