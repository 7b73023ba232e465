// scripts/benchmark.rs
use fast_fem::analytics::bs_analytic;
use fast_fem::fem::DiscretizationConfig;
use fast_fem::math_utils::Timer;
use fast_fem::mesh::{BoundaryFaces, Domain, Mesh};
use fast_fem::models::{Heston, HestonParams, Market};
use fast_fem::pricing::{Payoff, PricingProblem};
use fast_fem::solvers::{BoundaryCondition, BoundaryRule, BoundaryValue};
use std::env;
use std::fs::File;
use std::io::{self, Write};
use std::process::Command;
use std::sync::Arc;

const RATE: f64 = 0.03;
const SIGMA: f64 = 0.2;
const STRIKE: f64 = 1.0;
const MATURITY: f64 = 1.0;

#[derive(Debug)]
struct SystemInfo {
    os: String,
    cpu_model: String,
    cpu_cores: usize,
    rust_version: String,
    rustc_flags: String,
    rayon_threads: usize,
}

impl SystemInfo {
    fn gather() -> Self {
        Self {
            os: env::consts::OS.to_string(),
            cpu_model: Self::cpu_model(),
            cpu_cores: num_cpus::get(),
            rust_version: Command::new("rustc")
                .arg("--version")
                .output()
                .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
                .unwrap_or_else(|_| "Unknown Rust version".to_string()),
            rustc_flags: env::var("RUSTFLAGS").unwrap_or_else(|_| "default".to_string()),
            rayon_threads: rayon::current_num_threads(),
        }
    }

    fn cpu_model() -> String {
        #[cfg(target_os = "linux")]
        {
            std::fs::read_to_string("/proc/cpuinfo")
                .ok()
                .and_then(|content| {
                    content
                        .lines()
                        .find(|line| line.starts_with("model name"))
                        .and_then(|line| line.split(':').nth(1))
                        .map(|s| s.trim().to_string())
                })
                .unwrap_or_else(|| "Unknown CPU".to_string())
        }

        #[cfg(target_os = "macos")]
        {
            Command::new("sysctl")
                .args(["-n", "machdep.cpu.brand_string"])
                .output()
                .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
                .unwrap_or_else(|_| "Unknown CPU".to_string())
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            "Unknown CPU".to_string()
        }
    }
}

#[derive(Debug)]
struct BenchmarkResult {
    name: String,
    elements: usize,
    dofs: usize,
    time_ms: f64,
    value: f64,
    analytic_value: Option<f64>,
}

impl BenchmarkResult {
    fn abs_error(&self) -> Option<f64> {
        self.analytic_value.map(|exact| (self.value - exact).abs())
    }
}

fn black_scholes_call() -> PricingProblem {
    let mut problem = PricingProblem::default_call().expect("Valid problem");
    problem.time_steps = 200;
    problem
}

fn time_solve(name: String, problem: &PricingProblem, mesh: Mesh, state: &[f64], exact: Option<f64>) -> Option<BenchmarkResult> {
    let mesh = Arc::new(mesh);
    let mut timer = Timer::new();
    timer.start();
    let result = problem
        .solve_on(&mesh)
        .and_then(|solution| Ok((problem.price_at(&solution, 1.0, state)?, solution.space().num_dofs())));
    let time_ms = timer.elapsed_ms();
    match result {
        Ok((value, dofs)) => Some(BenchmarkResult {
            name,
            elements: mesh.num_elements(),
            dofs,
            time_ms,
            value,
            analytic_value: exact,
        }),
        Err(e) => {
            println!("  {} failed: {}", name, e);
            None
        }
    }
}

fn run_black_scholes_benchmarks() -> Vec<BenchmarkResult> {
    let exact = bs_analytic::bs_call_price(1.0, STRIKE, RATE, 0.0, SIGMA, MATURITY);
    let mut results = Vec::new();

    let linear = black_scholes_call();
    for level in 5..=11 {
        println!("Running P1 level {}...", level);
        let mesh = Mesh::uniform(&linear.domain, level).expect("Valid mesh");
        results.extend(time_solve(format!("BS call P1 level {}", level), &linear, mesh, &[], Some(exact)));
    }

    let mut quadratic = black_scholes_call();
    quadratic.discretization = DiscretizationConfig::quadratic();
    for level in 4..=9 {
        println!("Running P2 level {}...", level);
        let mesh = Mesh::uniform(&quadratic.domain, level).expect("Valid mesh");
        results.extend(time_solve(format!("BS call P2 level {}", level), &quadratic, mesh, &[], Some(exact)));
    }

    let adaptive = black_scholes_call();
    println!("Running adaptive refinement...");
    let mut timer = Timer::new();
    timer.start();
    match adaptive.solve_adaptive(5) {
        Ok(outcome) => {
            let time_ms = timer.elapsed_ms();
            match adaptive.price_at(&outcome.best.solution, 1.0, &[]) {
                Ok(value) => results.push(BenchmarkResult {
                    name: format!("BS call adaptive ({} iter)", outcome.iterations),
                    elements: outcome.best.mesh.num_elements(),
                    dofs: outcome.best.solution.space().num_dofs(),
                    time_ms,
                    value,
                    analytic_value: Some(exact),
                }),
                Err(e) => println!("  adaptive pricing failed: {}", e),
            }
        }
        Err(e) => println!("  adaptive solve failed: {}", e),
    }

    results
}

fn run_heston_benchmarks() -> Vec<BenchmarkResult> {
    let market = Market::new(RATE, 0.0).expect("Valid market");
    let params = HestonParams {
        kappa: 2.0,
        theta: 0.04,
        xi: 0.3,
        rho: -0.5,
    };
    let domain = Domain::new(2, vec![(0.0, 3.0), (0.0, 0.25)]).expect("Valid domain");
    let mut problem = PricingProblem::new(
        Arc::new(Heston::new(market, params).expect("Valid parameters")),
        Payoff::put(STRIKE).expect("Valid strike"),
        domain.clone(),
        MATURITY,
    )
    .expect("Valid problem");
    problem.time_steps = 50;
    problem.boundary = BoundaryCondition::Constraints(vec![BoundaryRule::dirichlet(
        BoundaryFaces::X_MIN | BoundaryFaces::X_MAX,
        BoundaryValue::MeanVarianceBlackScholes,
    )]);

    let mut results = Vec::new();
    for cells in [[24usize, 8], [48, 16], [96, 32]] {
        println!("Running Heston put on {}x{} cells...", cells[0], cells[1]);
        let mesh = Mesh::structured(&domain, &cells).expect("Valid mesh");
        results.extend(time_solve(
            format!("Heston put {}x{}", cells[0], cells[1]),
            &problem,
            mesh,
            &[0.04],
            None,
        ));
    }
    results
}

fn write_results_to_csv(results: &[BenchmarkResult], system_info: &SystemInfo, filename: &str) -> io::Result<()> {
    let mut file = File::create(filename)?;

    writeln!(file, "# System Information")?;
    writeln!(file, "# OS: {}", system_info.os)?;
    writeln!(file, "# CPU: {}", system_info.cpu_model)?;
    writeln!(file, "# CPU Cores: {}", system_info.cpu_cores)?;
    writeln!(file, "# Rust Version: {}", system_info.rust_version)?;
    writeln!(file, "# RUSTFLAGS: {}", system_info.rustc_flags)?;
    writeln!(file, "# Rayon Threads: {}", system_info.rayon_threads)?;
    writeln!(
        file,
        "# Benchmark Date: {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(file, "#")?;
    writeln!(file, "Benchmark,Elements,Dofs,Time_ms,Value,Analytic_Value,Abs_Error")?;

    for result in results {
        writeln!(
            file,
            "{},{},{},{:.2},{:.8},{},{}",
            result.name,
            result.elements,
            result.dofs,
            result.time_ms,
            result.value,
            result
                .analytic_value
                .map(|v| format!("{:.8}", v))
                .unwrap_or_else(|| "N/A".to_string()),
            result
                .abs_error()
                .map(|e| format!("{:.3e}", e))
                .unwrap_or_else(|| "N/A".to_string())
        )?;
    }
    Ok(())
}

fn main() {
    env_logger::init();
    println!("fast-fem Benchmark Suite");
    println!("========================\n");

    let system_info = SystemInfo::gather();
    println!("System Information:");
    println!("  OS: {}", system_info.os);
    println!("  CPU: {}", system_info.cpu_model);
    println!("  CPU Cores: {}", system_info.cpu_cores);
    println!("  Rust Version: {}", system_info.rust_version);
    println!("  RUSTFLAGS: {}", system_info.rustc_flags);
    println!("  Rayon Threads: {}", system_info.rayon_threads);
    println!();

    let mut all_results = run_black_scholes_benchmarks();
    all_results.extend(run_heston_benchmarks());

    println!("\n{:=<90}", "");
    println!("BENCHMARK RESULTS");
    println!("{:=<90}", "");
    println!(
        "{:<32} {:>9} {:>9} {:>11} {:>12} {:>12}",
        "Benchmark", "Elements", "Dofs", "Time (ms)", "Value", "Abs Error"
    );
    println!("{:-<90}", "");
    for result in &all_results {
        println!(
            "{:<32} {:>9} {:>9} {:>11.2} {:>12.6} {:>12}",
            result.name,
            result.elements,
            result.dofs,
            result.time_ms,
            result.value,
            result
                .abs_error()
                .map(|e| format!("{:.3e}", e))
                .unwrap_or_else(|| "N/A".to_string())
        );
    }
    println!("{:=<90}", "");

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let filename = format!("benchmark_results_{}.csv", timestamp);
    match write_results_to_csv(&all_results, &system_info, &filename) {
        Ok(()) => println!("\nResults saved to: {}", filename),
        Err(e) => println!("\nCould not write {}: {}", filename, e),
    }
    println!("Run with: cargo run --bin benchmark --release");
}
