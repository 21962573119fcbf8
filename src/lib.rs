//! MCMC for a zero-inflated Dirichlet-multinomial mixture of count vectors, with
//! Jain–Neal split-merge moves over a truncated set of components.
//!
//! [`zidm::run`] samples labels, log-rates and the at-risk mask. [`collapsed::run`]
//! samples labels alone with the rates integrated out.

pub mod atrisk;
pub mod clust;
pub mod collapsed;
pub mod data;
pub mod error;
pub mod hyper;
pub mod marginal;
pub mod mcmc;
pub mod numeric;
pub mod prelude;
pub mod rates;
pub mod sm;
pub mod zidm;

#[cfg(test)]
mod testing;
