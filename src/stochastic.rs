use serde::{Deserialize, Serialize};

/// Request sent to an external stochastic solver: candidate execution
/// times `s` with their energy prices `p`, the job's deadline, its epoch
/// progress and the name of its completion-time distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverRequest {
    pub s: Vec<f64>,
    pub p: Vec<f64>,
    pub d: f64,
    pub e: f64,
    pub max_e: f64,
    pub distribution: String,
}

/// Solver answer: objective value, expected tardiness cost, and a weight
/// per candidate (the heaviest one is the elected setup).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverResponse {
    pub obj: f64,
    pub tc: f64,
    pub x: Vec<f64>,
}

/// Boundary to the stochastic setup-selection service. Implementations may
/// talk to a remote optimizer; the scheduler only depends on this trait.
pub trait SolverClient {
    fn solve(&self, request: &SolverRequest) -> anyhow::Result<SolverResponse>;
}

/// Offline stand-in: always elects the first candidate, which the engine
/// orders cheapest-first, so stochastic runs degrade to the deterministic
/// greedy choice.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicSolver;

impl SolverClient for DeterministicSolver {
    fn solve(&self, request: &SolverRequest) -> anyhow::Result<SolverResponse> {
        anyhow::ensure!(!request.s.is_empty(), "no candidates to choose from");
        let mut x = vec![0.0; request.s.len()];
        x[0] = 1.0;
        Ok(SolverResponse {
            obj: request.p.first().copied().unwrap_or(0.0),
            tc: 0.0,
            x,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SolverRequest {
        SolverRequest {
            s: vec![40.0, 90.0, 120.0],
            p: vec![240.0, 135.0, 180.0],
            d: 500.0,
            e: 2.0,
            max_e: 10.0,
            distribution: "exponential".to_string(),
        }
    }

    #[test]
    fn test_stub_elects_first_candidate() {
        let response = DeterministicSolver.solve(&request()).unwrap();
        assert_eq!(response.x, vec![1.0, 0.0, 0.0]);
        assert_eq!(response.obj, 240.0);
    }

    #[test]
    fn test_stub_rejects_empty_request() {
        let mut req = request();
        req.s.clear();
        assert!(DeterministicSolver.solve(&req).is_err());
    }

    #[test]
    fn test_wire_format_round_trip() {
        let req = request();
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"distribution\":\"exponential\""));
        let back: SolverRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req, back);

        let resp: SolverResponse =
            serde_json::from_str(r#"{"obj": 1.5, "tc": 0.25, "x": [0.0, 1.0]}"#).unwrap();
        assert_eq!(resp.x, vec![0.0, 1.0]);
    }
}
