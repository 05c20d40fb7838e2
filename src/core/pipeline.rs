use crate::core::harmonics::{AddDependents, HarmonicConfig, Predictor, ResidualDiff};
use crate::core::image::{Image, ImageCollection};
use crate::core::qa_mask::{QaMaskConfig, QualityMask};
use crate::core::regression::{HarmonicFit, HarmonicRegression};
use crate::types::GwResult;

/// Output of a seasonal pipeline run
#[derive(Debug, Clone)]
pub struct SeasonalModel {
    pub fit: HarmonicFit,
    /// Input images with predictor, `fitted` and `diff` bands added
    pub residuals: ImageCollection,
}

/// Quality mask, harmonic predictors, per-pixel fit, prediction and residuals in one pass
#[derive(Debug, Clone)]
pub struct SeasonalPipeline {
    harmonic: HarmonicConfig,
    qa: QaMaskConfig,
    area_mask: Image,
    rescale_by_rmse: bool,
}

impl SeasonalPipeline {
    pub fn new(harmonic: HarmonicConfig, qa: QaMaskConfig, area_mask: Image) -> GwResult<Self> {
        harmonic.validate()?;
        qa.validate()?;
        Ok(Self {
            harmonic,
            qa,
            area_mask,
            rescale_by_rmse: false,
        })
    }

    /// Divide residuals by the per-pixel RMSE of the fit
    pub fn rescale_by_rmse(mut self, enabled: bool) -> Self {
        self.rescale_by_rmse = enabled;
        self
    }

    pub fn run(&self, collection: &ImageCollection) -> GwResult<SeasonalModel> {
        let index = self.harmonic.index_band.as_str();
        log::info!(
            "Starting seasonal pipeline on {} images (index {}, harmonics {:?})",
            collection.len(),
            index,
            self.harmonic.harmonics
        );

        log::info!("Step 1: quality masking");
        let mask = QualityMask::new(index, self.area_mask.clone()).with_config(self.qa.clone())?;
        let cleaned = collection.map(&mask)?;

        log::info!("Step 2: time and harmonic predictors");
        let terms = self.harmonic.terms()?;
        let predictors = cleaned.map(&AddDependents)?.map(&terms)?;

        log::info!("Step 3: per-pixel regression");
        let regression = HarmonicRegression::new(self.harmonic.independents(), index)?;
        let fit = regression.fit(&predictors)?;

        log::info!("Step 4: prediction and residuals");
        let predictor = Predictor::new(regression.independents().to_vec(), fit.coefficients.clone())?;
        let mut diff = ResidualDiff::new(index);
        if self.rescale_by_rmse {
            diff = diff.with_rmse(fit.rmse.clone())?;
        }
        let residuals = predictors.map(&predictor)?.map(&diff)?;

        log::info!("Seasonal pipeline completed");
        Ok(SeasonalModel { fit, residuals })
    }
}
