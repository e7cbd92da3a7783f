pub mod normalizer;

pub use normalizer::AudioNormalizer;
