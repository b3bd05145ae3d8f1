pub mod basecaller;
pub mod checkpoint;
pub mod config;
pub mod constants;
pub mod error;
pub mod models;
#[cfg(test)]
pub mod test;
pub mod util {
    pub mod fast5_reader;
    pub mod inspect;
    pub mod prune;
    pub mod quantize;
}
