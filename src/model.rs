//! A compartmental ODE model described by its transitions.

use crate::{
    expr::{Expression, Parameter},
    ops::{self, Builtins},
};
use smol_str::SmolStr;
use std::{
    collections::HashMap,
    error::Error,
    fmt::{self, Display, Formatter},
};

/// A flow between compartments, with a symbolic rate.
///
/// An empty origin means the flow enters from outside the system (births,
/// immigration); an empty destination means it leaves (deaths, removal).
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    origin: Vec<SmolStr>,
    destination: Vec<SmolStr>,
    rate: Expression,
}

impl Transition {
    pub fn new(origin: &str, destination: &str, rate: Expression) -> Self {
        Transition {
            origin: vec![origin.into()],
            destination: vec![destination.into()],
            rate,
        }
    }

    /// A flow into the system from outside, e.g. births.
    pub fn entry(destination: &str, rate: Expression) -> Self {
        Transition {
            origin: Vec::new(),
            destination: vec![destination.into()],
            rate,
        }
    }

    /// A flow out of the system, e.g. deaths.
    pub fn exit(origin: &str, rate: Expression) -> Self {
        Transition {
            origin: vec![origin.into()],
            destination: Vec::new(),
            rate,
        }
    }

    /// A composite flow touching several compartments at once.
    pub fn between(
        origins: &[&str],
        destinations: &[&str],
        rate: Expression,
    ) -> Self {
        Transition {
            origin: origins.iter().map(|&s| s.into()).collect(),
            destination: destinations.iter().map(|&s| s.into()).collect(),
            rate,
        }
    }

    pub fn origin(&self) -> &[SmolStr] { &self.origin }

    pub fn destination(&self) -> &[SmolStr] { &self.destination }

    pub fn rate(&self) -> &Expression { &self.rate }

    /// The origin's name, when it reduces to exactly one compartment.
    pub fn single_origin(&self) -> Option<&str> {
        match self.origin.as_slice() {
            [name] => Some(name),
            _ => None,
        }
    }

    /// The destination's name, when it reduces to exactly one compartment.
    pub fn single_destination(&self) -> Option<&str> {
        match self.destination.as_slice() {
            [name] => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    UnknownState { name: SmolStr },
}

impl Display for ModelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnknownState { name } => {
                write!(f, "The model has no state named \"{}\"", name)
            },
        }
    }
}

impl Error for ModelError {}

/// A compartmental model: ordered states, ordered parameters (with optional
/// bound numeric values), and the transitions between compartments.
#[derive(Debug, Clone, PartialEq)]
pub struct OdeModel {
    states: Vec<Parameter>,
    parameters: Vec<Parameter>,
    parameter_values: HashMap<Parameter, f64>,
    transitions: Vec<Transition>,
}

impl OdeModel {
    pub fn new(states: &[&str], parameters: &[&str]) -> Self {
        OdeModel {
            states: states.iter().map(Parameter::named).collect(),
            parameters: parameters.iter().map(Parameter::named).collect(),
            parameter_values: HashMap::new(),
            transitions: Vec::new(),
        }
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn with_transitions<I>(mut self, transitions: I) -> Self
    where
        I: IntoIterator<Item = Transition>,
    {
        self.transitions.extend(transitions);
        self
    }

    /// Bind a numeric value to a parameter, so threshold expressions can be
    /// reduced all the way down to numbers.
    pub fn bind_parameter(mut self, name: &str, value: f64) -> Self {
        self.parameter_values.insert(Parameter::named(name), value);
        self
    }

    pub fn states(&self) -> &[Parameter] { &self.states }

    pub fn parameters(&self) -> &[Parameter] { &self.parameters }

    pub fn parameter_values(&self) -> &HashMap<Parameter, f64> {
        &self.parameter_values
    }

    pub fn transitions(&self) -> &[Transition] { &self.transitions }

    /// The positional index of each named state, in the order the names were
    /// given.
    pub fn state_index(&self, names: &[&str]) -> Result<Vec<usize>, ModelError> {
        names
            .iter()
            .map(|&name| {
                self.states
                    .iter()
                    .position(|state| state.name() == name)
                    .ok_or_else(|| ModelError::UnknownState { name: name.into() })
            })
            .collect()
    }

    /// The symbolic derivative vector: for each state, the sum of every
    /// inflow rate minus the sum of every outflow rate.
    pub fn ode(&self) -> Vec<Expression> {
        let ctx = Builtins::default();

        self.states
            .iter()
            .map(|state| {
                let mut derivative = Expression::Constant(0.0);

                for transition in &self.transitions {
                    let is_destination = transition
                        .destination
                        .iter()
                        .any(|name| name == state.name());
                    let is_origin = transition
                        .origin
                        .iter()
                        .any(|name| name == state.name());

                    if is_destination {
                        derivative = derivative + transition.rate.clone();
                    }
                    if is_origin {
                        derivative = derivative - transition.rate.clone();
                    }
                }

                ops::fold_constants(&derivative, &ctx)
            })
            .collect()
    }

    /// The same compartments and parameters, but only a subset of the
    /// transitions. Used to isolate one class of flows.
    pub fn reduced(&self, transitions: Vec<Transition>) -> OdeModel {
        OdeModel {
            states: self.states.clone(),
            parameters: self.parameters.clone(),
            parameter_values: self.parameter_values.clone(),
            transitions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::evaluate;

    fn sir() -> OdeModel {
        OdeModel::new(&["S", "I", "R"], &["beta", "gamma", "N"])
            .with_transition(Transition::new(
                "S",
                "I",
                "beta*S*I/N".parse().unwrap(),
            ))
            .with_transition(Transition::new(
                "I",
                "R",
                "gamma*I".parse().unwrap(),
            ))
    }

    #[test]
    fn look_up_state_indices() {
        let model = sir();

        assert_eq!(model.state_index(&["I"]).unwrap(), vec![1]);
        assert_eq!(model.state_index(&["R", "S"]).unwrap(), vec![2, 0]);
        assert_eq!(
            model.state_index(&["E"]).unwrap_err(),
            ModelError::UnknownState { name: "E".into() }
        );
    }

    #[test]
    fn derivative_vector_balances_flows() {
        let model = sir();

        let ode = model.ode();

        assert_eq!(ode.len(), 3);
        let bindings = |p: &Parameter| match p.name() {
            "beta" => Some(0.4),
            "gamma" => Some(0.2),
            "S" => Some(800.0),
            "I" => Some(50.0),
            "R" => Some(150.0),
            "N" => Some(1000.0),
            _ => None,
        };
        let ctx = Builtins::default();
        let infection = 0.4 * 800.0 * 50.0 / 1000.0;
        let recovery = 0.2 * 50.0;

        let ds = evaluate(&ode[0], &bindings, &ctx).unwrap();
        let di = evaluate(&ode[1], &bindings, &ctx).unwrap();
        let dr = evaluate(&ode[2], &bindings, &ctx).unwrap();
        assert!(approx::relative_eq!(ds, -infection));
        assert!(approx::relative_eq!(di, infection - recovery));
        assert!(approx::relative_eq!(dr, recovery));
    }

    #[test]
    fn entries_and_exits_show_up_in_the_derivative() {
        let model = OdeModel::new(&["S"], &["Lambda", "mu"])
            .with_transition(Transition::entry("S", "Lambda".parse().unwrap()))
            .with_transition(Transition::exit("S", "mu*S".parse().unwrap()));

        let ode = model.ode();

        let got = evaluate(
            &ode[0],
            &|p: &Parameter| match p.name() {
                "Lambda" => Some(5.0),
                "mu" => Some(0.1),
                "S" => Some(20.0),
                _ => None,
            },
            &Builtins::default(),
        )
        .unwrap();
        assert!(approx::relative_eq!(got, 5.0 - 0.1 * 20.0));
    }

    #[test]
    fn composite_endpoints_do_not_reduce_to_a_single_name() {
        let composite = Transition::between(
            &["S", "V"],
            &["I"],
            "beta*I".parse().unwrap(),
        );

        assert_eq!(composite.single_origin(), None);
        assert_eq!(composite.single_destination(), Some("I"));
        assert_eq!(
            Transition::entry("I", "Lambda".parse().unwrap()).single_origin(),
            None
        );
    }

    #[test]
    fn reduced_models_keep_the_state_ordering() {
        let model = sir();
        let infection_only =
            model.reduced(vec![model.transitions()[0].clone()]);

        assert_eq!(infection_only.states(), model.states());
        assert_eq!(infection_only.transitions().len(), 1);

        // dR/dt has no contributions left
        let ode = infection_only.ode();
        assert_eq!(ode[2], Expression::Constant(0.0));
    }
}
