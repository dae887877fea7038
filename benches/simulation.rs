//! # Kinetics Simulation Benchmark
//!
//! Compares the two evaluation backends on a small enzyme-kinetics model and
//! measures them inside a full ODE integration.
//!
//! ## System Description
//!
//! Three states with Michaelis-Menten kinetics and product decay:
//! - `ds/dt = -(vmax * s) / (km + s)`
//! - `dp/dt = (vmax * s) / (km + s) - kie * p`
//! - `de/dt = -kie * e`
//!
//! ## Measurements
//!
//! 1. **Construction**: one full classification pass per backend, including
//!    JIT compilation for the compiled backend.
//! 2. **Evaluation**: a single derivative-vector evaluation per backend,
//!    against a hand-coded baseline representing the performance ceiling.
//! 3. **Integration**: a complete Dormand-Prince 5 run (t = 0 to 50) driving
//!    each backend's RHS closure, against the same baseline.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use dae_sim::types::RhsFn;
use dae_sim::{Backend, Model, Simulator};
use ode_solvers::dopri5::*;
use ode_solvers::*;

type State = Vector3<f64>;

const VMAX: f64 = 0.85;
const KM: f64 = 150.0;
const KIE: f64 = 0.01;

/// Builds the kinetics model with constraints declared in state order.
fn kinetics_model() -> Model {
    let mut m = Model::new("kinetics");
    let t = m.continuous("t", 0.0, 50.0);
    let s = m.var("s", &[t.dim()]);
    let p = m.var("p", &[t.dim()]);
    let e = m.var("e", &[t.dim()]);
    let ds = m.derivative("ds", &s, &t);
    let dp = m.derivative("dp", &p, &t);
    let de = m.derivative("de", &e, &t);
    let vmax = m.param("vmax", VMAX);
    let km = m.param("km", KM);
    let kie = m.param("kie", KIE);
    s.set_initial(1000.0);
    p.set_initial(100.0);
    e.set_initial(10.0);

    {
        let (s, vmax, km) = (s.clone(), vmax.clone(), km.clone());
        m.constraint("substrate", &[t.dim()], move |ix| {
            ds.at(ix)
                .equals(-1.0 * vmax.expr() * s.at(ix) / (km.expr() + s.at(ix)))
        });
    }
    {
        let (p, kie) = (p.clone(), kie.clone());
        m.constraint("product", &[t.dim()], move |ix| {
            dp.at(ix)
                .equals(vmax.expr() * s.at(ix) / (km.expr() + s.at(ix)) - kie.expr() * p.at(ix))
        });
    }
    m.constraint("enzyme", &[t.dim()], move |ix| {
        de.at(ix).equals(-1.0 * kie.expr() * e.at(ix))
    });
    m
}

/// Hand-coded implementation of the same system, the performance ceiling.
struct DirectSystem;

impl System<f64, State> for DirectSystem {
    #[inline(always)]
    fn system(&self, _t: f64, y: &State, dy: &mut State) {
        let rate = (VMAX * y[0]) / (KM + y[0]);
        dy[0] = -rate;
        dy[1] = rate - KIE * y[1];
        dy[2] = -KIE * y[2];
    }
}

/// Adapter driving a built RHS closure through the ode_solvers interface.
struct SimulatedSystem<'a> {
    rhs: &'a RhsFn,
}

impl System<f64, State> for SimulatedSystem<'_> {
    #[inline(always)]
    fn system(&self, t: f64, y: &State, dy: &mut State) {
        (self.rhs)(t, y.as_slice(), dy.as_mut_slice());
    }
}

/// Integrates from t = 0 to 50 and returns the number of accepted steps.
fn run_simulation<S: System<f64, State>>(system: S, y0: State) -> usize {
    let mut stepper = Dopri5::new(system, 0.0, 50.0, 0.1, y0, 1.0e-6, 1.0e-8);
    let _ = stepper.integrate();
    stepper.x_out().len()
}

fn benchmark_simulations(c: &mut Criterion) {
    let model = kinetics_model();
    let y0 = State::new(1000.0, 100.0, 10.0);

    let mut construction = c.benchmark_group("Construction");
    construction.bench_function("Interpreted", |b| {
        b.iter(|| Simulator::new(black_box(&model), Backend::Interpreted).unwrap())
    });
    construction.bench_function("Compiled", |b| {
        b.iter(|| Simulator::new(black_box(&model), Backend::Compiled).unwrap())
    });
    construction.finish();

    let interpreted = Simulator::new(&model, Backend::Interpreted).unwrap();
    let compiled = Simulator::new(&model, Backend::Compiled).unwrap();
    let states = [1000.0, 100.0, 10.0];
    let mut out = [0.0; 3];

    let mut evaluation = c.benchmark_group("Evaluation");
    evaluation.bench_function("Direct", |b| {
        let direct = DirectSystem;
        let mut dy = State::zeros();
        b.iter(|| {
            direct.system(black_box(0.0), black_box(&y0), &mut dy);
            dy
        })
    });
    evaluation.bench_function("Interpreted", |b| {
        b.iter(|| {
            interpreted
                .eval_into(black_box(0.0), black_box(&states), &mut out)
                .unwrap();
            out
        })
    });
    evaluation.bench_function("Compiled", |b| {
        b.iter(|| {
            compiled
                .eval_into(black_box(0.0), black_box(&states), &mut out)
                .unwrap();
            out
        })
    });
    evaluation.finish();

    let interpreted_rhs = interpreted.rhs_fn().unwrap();
    let compiled_rhs = compiled.rhs_fn().unwrap();

    let mut integration = c.benchmark_group("Integration");
    integration.bench_function("Direct", |b| {
        b.iter(|| run_simulation(black_box(DirectSystem), y0))
    });
    integration.bench_function("Interpreted", |b| {
        b.iter(|| run_simulation(black_box(SimulatedSystem { rhs: &interpreted_rhs }), y0))
    });
    integration.bench_function("Compiled", |b| {
        b.iter(|| run_simulation(black_box(SimulatedSystem { rhs: &compiled_rhs }), y0))
    });
    integration.finish();
}

criterion_group!(benches, benchmark_simulations);
criterion_main!(benches);
