pub mod black_scholes;
pub mod credit_risk;
pub mod heston;
pub mod heston_rates;
pub mod local_vol;
pub mod model;

pub use black_scholes::BlackScholes;
pub use credit_risk::CreditRisk;
pub use heston::{Heston, HestonParams};
pub use heston_rates::{HestonStochasticRate, ShortRateParams};
pub use local_vol::LocalVolatility;
pub use model::{Market, PriceCoordinate, PricingDynamics};
