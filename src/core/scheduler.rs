use crate::core::pipeline::VegetationProcessor;
use crate::core::progress::ProgressSink;
use crate::io::catalog::DateRange;
use crate::io::city::CityRecord;
use crate::io::output::VegetationSummary;
use crate::types::{GreenError, GreenResult};
use std::path::{Path, PathBuf};

/// One city over one date window, with its own output directory
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub city: CityRecord,
    pub dates: DateRange,
    pub output_dir: PathBuf,
}

impl ProcessingJob {
    pub fn new<P: AsRef<Path>>(city: CityRecord, dates: DateRange, output_dir: P) -> Self {
        Self {
            city,
            dates,
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    /// Twelve jobs, one per calendar month, under `root/<city>/<YYYY-MM>`
    pub fn monthly<P: AsRef<Path>>(city: &CityRecord, year: i32, root: P) -> GreenResult<Vec<Self>> {
        let base = root.as_ref().join(slug(&city.city));
        (1..=12)
            .map(|month| {
                let dates = DateRange::month(year, month)?;
                Ok(Self::new(
                    city.clone(),
                    dates,
                    base.join(format!("{:04}-{:02}", year, month)),
                ))
            })
            .collect()
    }
}

fn slug(name: &str) -> String {
    let slug: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if slug.is_empty() {
        "city".to_string()
    } else {
        slug
    }
}

/// Runs independent jobs on a bounded worker pool
pub struct JobScheduler {
    workers: usize,
}

impl JobScheduler {
    pub fn new(workers: usize) -> GreenResult<Self> {
        if workers == 0 {
            return Err(GreenError::InvalidInput(
                "Scheduler needs at least one worker".to_string(),
            ));
        }
        Ok(Self { workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Results come back in submission order; one failed job does not stop the rest
    #[cfg(feature = "parallel")]
    pub fn run(
        &self,
        processor: &VegetationProcessor<'_>,
        jobs: &[ProcessingJob],
        progress: &dyn ProgressSink,
    ) -> GreenResult<Vec<GreenResult<VegetationSummary>>> {
        use rayon::prelude::*;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| GreenError::Processing(format!("Failed to build job pool: {}", e)))?;

        log::info!("Running {} jobs on {} workers", jobs.len(), self.workers);
        Ok(pool.install(|| {
            jobs.par_iter()
                .map(|job| run_job(processor, job, progress))
                .collect()
        }))
    }

    #[cfg(not(feature = "parallel"))]
    pub fn run(
        &self,
        processor: &VegetationProcessor<'_>,
        jobs: &[ProcessingJob],
        progress: &dyn ProgressSink,
    ) -> GreenResult<Vec<GreenResult<VegetationSummary>>> {
        log::info!("Running {} jobs sequentially", jobs.len());
        Ok(jobs.iter().map(|job| run_job(processor, job, progress)).collect())
    }
}

fn run_job(
    processor: &VegetationProcessor<'_>,
    job: &ProcessingJob,
    progress: &dyn ProgressSink,
) -> GreenResult<VegetationSummary> {
    let result = processor.run_and_emit(&job.city, &job.dates, &job.output_dir, progress);
    if let Err(e) = &result {
        log::error!("{} ({}) failed: {}", job.city.display_name(), job.dates.label(), e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_monthly_jobs_cover_the_year() {
        let city = CityRecord::new("San José", "Costa Rica").with_coordinates(9.93, -84.08);
        let jobs = ProcessingJob::monthly(&city, 2024, "/tmp/out").unwrap();

        assert_eq!(jobs.len(), 12);
        assert_eq!(jobs[1].dates.start, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(jobs[1].dates.end, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(jobs[11].output_dir, PathBuf::from("/tmp/out/san_josé/2024-12"));
    }

    #[test]
    fn test_scheduler_rejects_zero_workers() {
        assert!(JobScheduler::new(0).is_err());
        assert_eq!(JobScheduler::new(3).unwrap().workers(), 3);
    }
}
