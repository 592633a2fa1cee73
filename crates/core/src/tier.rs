use types::Priority;

/// Eligible ids split by priority. `Not` rows are already subtracted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TieredIds<T> {
    pub mandatory: Vec<T>,
    pub high: Vec<T>,
    pub low: Vec<T>,
}

impl<T> Default for TieredIds<T> {
    fn default() -> Self {
        Self {
            mandatory: Vec::new(),
            high: Vec::new(),
            low: Vec::new(),
        }
    }
}

impl<T> TieredIds<T> {
    pub fn tier(&self, p: Priority) -> &[T] {
        match p {
            Priority::Mandatory => &self.mandatory,
            Priority::High => &self.high,
            Priority::Low => &self.low,
            Priority::Not => &[],
        }
    }

    /// First non-empty tier in mandatory, high, low order.
    pub fn tightest(&self) -> &[T] {
        Priority::TIERS
            .into_iter()
            .map(|p| self.tier(p))
            .find(|t| !t.is_empty())
            .unwrap_or(&[])
    }

    /// The high tier can be dropped only while nothing is mandatory.
    pub fn can_relax(&self) -> bool {
        self.mandatory.is_empty() && !self.high.is_empty()
    }

    pub fn relax(&mut self) -> bool {
        if !self.can_relax() {
            return false;
        }
        self.high.clear();
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.mandatory.iter().chain(&self.high).chain(&self.low)
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> TieredIds<U> {
        TieredIds {
            mandatory: self.mandatory.into_iter().map(&mut f).collect(),
            high: self.high.into_iter().map(&mut f).collect(),
            low: self.low.into_iter().map(&mut f).collect(),
        }
    }
}

impl<T: Copy + PartialEq> TieredIds<T> {
    /// Union of every tier, first occurrence wins.
    pub fn all(&self) -> Vec<T> {
        let mut out = Vec::new();
        for id in self.iter() {
            if !out.contains(id) {
                out.push(*id);
            }
        }
        out
    }
}

/// Accumulates link rows per priority before the fallback and exclusion
/// rules are applied.
#[derive(Clone, Debug)]
pub struct TierBuilder<T> {
    tiers: TieredIds<T>,
    excluded: Vec<T>,
}

impl<T> Default for TierBuilder<T> {
    fn default() -> Self {
        Self {
            tiers: TieredIds::default(),
            excluded: Vec::new(),
        }
    }
}

impl<T: Copy + PartialEq> TierBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, priority: Priority, ids: impl IntoIterator<Item = T>) {
        let slot = match priority {
            Priority::Mandatory => &mut self.tiers.mandatory,
            Priority::High => &mut self.tiers.high,
            Priority::Low => &mut self.tiers.low,
            Priority::Not => &mut self.excluded,
        };
        slot.extend(ids);
    }

    pub fn exclude(&mut self, ids: impl IntoIterator<Item = T>) {
        self.excluded.extend(ids);
    }

    /// An empty low tier becomes `fallback` (when given) before exclusions
    /// are subtracted from every tier.
    pub fn build(self, fallback: Option<Vec<T>>) -> TieredIds<T> {
        let Self { mut tiers, excluded } = self;
        if tiers.low.is_empty() {
            if let Some(all) = fallback {
                tiers.low = all;
            }
        }
        let clean = |v: Vec<T>| {
            let mut out: Vec<T> = Vec::with_capacity(v.len());
            for id in v {
                if !excluded.contains(&id) && !out.contains(&id) {
                    out.push(id);
                }
            }
            out
        };
        TieredIds {
            mandatory: clean(tiers.mandatory),
            high: clean(tiers.high),
            low: clean(tiers.low),
        }
    }
}
