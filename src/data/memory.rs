use std::io;

use rand::{seq::SliceRandom, Rng};

use crate::shape::Shape;

use super::SupervisedDataReader;

/// Holds every entry in memory. Useful for small data sets and tests.
#[derive(Clone, Debug)]
pub struct InMemorySupervisedDataReader {
    input_configuration: Shape,
    output_configuration: Shape,
    entries: Vec<(Vec<u8>, Vec<f32>)>,
    cursor: usize,
}

impl InMemorySupervisedDataReader {
    pub fn new(input_configuration: Shape, output_configuration: Shape) -> Self {
        Self { input_configuration, output_configuration, entries: Vec::new(), cursor: 0 }
    }

    /// Appends an entry, panicking if its sizes do not match the reader's shapes.
    pub fn push(&mut self, input: Vec<u8>, output: Vec<f32>) {
        assert_eq!(input.len(), self.input_configuration.neuron_count(), "input size mismatch");
        assert_eq!(output.len(), self.output_configuration.neuron_count(), "output size mismatch");
        self.entries.push((input, output));
    }

    pub fn entries(&self) -> &[(Vec<u8>, Vec<f32>)] {
        &self.entries
    }

    /// Reorders the entries and rewinds.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.entries.shuffle(rng);
        self.cursor = 0;
    }
}

impl SupervisedDataReader for InMemorySupervisedDataReader {
    fn input_configuration(&self) -> &Shape {
        &self.input_configuration
    }

    fn output_configuration(&self) -> &Shape {
        &self.output_configuration
    }

    fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn read(&mut self, input: &mut [u8], output: &mut [f32]) -> io::Result<bool> {
        let Some((src_input, src_output)) = self.entries.get(self.cursor) else {
            return Ok(false);
        };

        if input.len() < src_input.len() || output.len() < src_output.len() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "destination buffer too small"));
        }

        input[..src_input.len()].copy_from_slice(src_input);
        output[..src_output.len()].copy_from_slice(src_output);
        self.cursor += 1;

        Ok(true)
    }

    fn reset(&mut self) -> io::Result<()> {
        self.cursor = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_until_exhausted() {
        let mut reader = InMemorySupervisedDataReader::new(Shape::flat(2), Shape::flat(1));
        reader.push(vec![1, 2], vec![0.5]);
        reader.push(vec![3, 4], vec![1.5]);

        let mut input = [0u8; 2];
        let mut output = [0.0f32; 1];

        assert!(reader.read(&mut input, &mut output).unwrap());
        assert_eq!((input, output), ([1, 2], [0.5]));
        assert!(reader.read(&mut input, &mut output).unwrap());
        assert!(!reader.read(&mut input, &mut output).unwrap());
        assert_eq!((input, output), ([3, 4], [1.5]));

        reader.reset().unwrap();
        assert!(reader.read(&mut input, &mut output).unwrap());
        assert_eq!(input, [1, 2]);
    }

    #[test]
    fn shuffle_keeps_entries() {
        let mut reader = InMemorySupervisedDataReader::new(Shape::flat(1), Shape::flat(1));
        for i in 0..32u8 {
            reader.push(vec![i], vec![f32::from(i)]);
        }

        reader.shuffle(&mut crate::rng::seeded(4));

        let mut seen = reader.entries().iter().map(|(x, _)| x[0]).collect::<Vec<_>>();
        assert!(reader.entries().iter().all(|(x, y)| f32::from(x[0]) == y[0]));
        seen.sort_unstable();
        assert_eq!(seen, (0..32).collect::<Vec<_>>());
    }
}
