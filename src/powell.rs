//! Derivative-free minimisation by Powell's conjugate direction method.
//!
//! Each outer iteration runs a Brent line search along every direction of the
//! current set, then tries the extrapolated overall displacement and swaps it
//! in for the direction of largest decrease when that keeps the set
//! conjugate. Line searches bracket from `[0, 1]` along the direction.

use nalgebra::DVector;

/// Stopping rules for [`minimize`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowellOptions {
    /// Relative tolerance on the step length of each line search.
    pub xtol: f64,
    /// Relative decrease of the objective below which the search stops.
    pub ftol: f64,
    /// Outer iteration cap; `None` means `1000 * n`.
    pub max_iterations: Option<usize>,
    /// Objective evaluation cap; `None` means `1000 * n`.
    pub max_evaluations: Option<usize>,
}

impl Default for PowellOptions {
    fn default() -> Self {
        Self {
            xtol: 1e-4,
            ftol: 1e-4,
            max_iterations: None,
            max_evaluations: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: DVector<f64>,
    pub fun: f64,
    pub iterations: usize,
    pub evaluations: usize,
    /// False when a budget ran out before the tolerance test passed.
    pub converged: bool,
}

/// Objective wrapper that refuses to evaluate once the budget is spent.
struct Budgeted<F> {
    f: F,
    calls: usize,
    max_calls: usize,
}

impl<F: FnMut(&DVector<f64>) -> f64> Budgeted<F> {
    fn eval(&mut self, x: &DVector<f64>) -> Option<f64> {
        if self.calls >= self.max_calls {
            return None;
        }
        self.calls += 1;
        Some((self.f)(x))
    }
}

const GOLD: f64 = 1.618034;
const VERY_SMALL: f64 = 1e-21;
const GROW_LIMIT: f64 = 110.0;
const BRACKET_MAX_ITER: usize = 1000;
const BRENT_CG: f64 = 0.381_966_0;
const BRENT_MINTOL: f64 = 1e-11;
const BRENT_MAX_ITER: usize = 500;

struct Bracket {
    xa: f64,
    xb: f64,
    xc: f64,
    fa: f64,
    fb: f64,
    fc: f64,
}

impl Bracket {
    fn is_valid(&self) -> bool {
        let descends = (self.fb < self.fc && self.fb <= self.fa)
            || (self.fb < self.fa && self.fb <= self.fc);
        let ordered =
            (self.xa < self.xb && self.xb < self.xc) || (self.xc < self.xb && self.xb < self.xa);
        let finite = self.xa.is_finite() && self.xb.is_finite() && self.xc.is_finite();
        descends && ordered && finite
    }

    /// Lowest of the three points, first one on ties.
    fn best(&self) -> (f64, f64) {
        let mut best = (self.xa, self.fa);
        for (x, f) in [(self.xb, self.fb), (self.xc, self.fc)] {
            if f < best.1 {
                best = (x, f);
            }
        }
        best
    }
}

/// Downhill bracket search starting from `[xa, xb]`.
fn bracket<G>(func: &mut G, mut xa: f64, mut xb: f64) -> Option<Bracket>
where
    G: FnMut(f64) -> Option<f64>,
{
    let mut fa = func(xa)?;
    let mut fb = func(xb)?;
    if fa < fb {
        std::mem::swap(&mut xa, &mut xb);
        std::mem::swap(&mut fa, &mut fb);
    }
    let mut xc = xb + GOLD * (xb - xa);
    let mut fc = func(xc)?;

    let mut iter = 0;
    while fc < fb {
        let tmp1 = (xb - xa) * (fb - fc);
        let tmp2 = (xb - xc) * (fb - fa);
        let val = tmp2 - tmp1;
        let denom = if val.abs() < VERY_SMALL { 2.0 * VERY_SMALL } else { 2.0 * val };
        let mut w = xb - ((xb - xc) * tmp2 - (xb - xa) * tmp1) / denom;
        let wlim = xb + GROW_LIMIT * (xc - xb);
        if iter > BRACKET_MAX_ITER {
            break;
        }
        iter += 1;

        let mut fw;
        if (w - xc) * (xb - w) > 0.0 {
            fw = func(w)?;
            if fw < fc {
                xa = xb;
                xb = w;
                fa = fb;
                fb = fw;
                break;
            } else if fw > fb {
                xc = w;
                fc = fw;
                break;
            }
            w = xc + GOLD * (xc - xb);
            fw = func(w)?;
        } else if (w - wlim) * (wlim - xc) >= 0.0 {
            w = wlim;
            fw = func(w)?;
        } else if (w - wlim) * (xc - w) > 0.0 {
            fw = func(w)?;
            if fw < fc {
                xb = xc;
                xc = w;
                w = xc + GOLD * (xc - xb);
                fb = fc;
                fc = fw;
                fw = func(w)?;
            }
        } else {
            w = xc + GOLD * (xc - xb);
            fw = func(w)?;
        }
        xa = xb;
        xb = xc;
        xc = w;
        fa = fb;
        fb = fc;
        fc = fw;
    }

    Some(Bracket { xa, xb, xc, fa, fb, fc })
}

/// Brent's method inside a valid bracket. Returns `(xmin, fmin)`.
fn brent<G>(func: &mut G, br: &Bracket, tol: f64) -> Option<(f64, f64)>
where
    G: FnMut(f64) -> Option<f64>,
{
    let (mut a, mut b) = if br.xa < br.xc { (br.xa, br.xc) } else { (br.xc, br.xa) };
    let (mut x, mut w, mut v) = (br.xb, br.xb, br.xb);
    let (mut fx, mut fw, mut fv) = (br.fb, br.fb, br.fb);
    let mut deltax: f64 = 0.0;
    let mut rat: f64 = 0.0;

    for _ in 0..BRENT_MAX_ITER {
        let tol1 = tol * x.abs() + BRENT_MINTOL;
        let tol2 = 2.0 * tol1;
        let xmid = 0.5 * (a + b);
        if (x - xmid).abs() < tol2 - 0.5 * (b - a) {
            break;
        }

        if deltax.abs() <= tol1 {
            deltax = if x >= xmid { a - x } else { b - x };
            rat = BRENT_CG * deltax;
        } else {
            // Parabolic step through x, w, v
            let tmp1 = (x - w) * (fx - fv);
            let mut tmp2 = (x - v) * (fx - fw);
            let mut p = (x - v) * tmp2 - (x - w) * tmp1;
            tmp2 = 2.0 * (tmp2 - tmp1);
            if tmp2 > 0.0 {
                p = -p;
            }
            tmp2 = tmp2.abs();
            let dx_temp = deltax;
            deltax = rat;

            if p > tmp2 * (a - x) && p < tmp2 * (b - x) && p.abs() < (0.5 * tmp2 * dx_temp).abs() {
                rat = p / tmp2;
                let u = x + rat;
                if (u - a) < tol2 || (b - u) < tol2 {
                    rat = if xmid - x >= 0.0 { tol1 } else { -tol1 };
                }
            } else {
                deltax = if x >= xmid { a - x } else { b - x };
                rat = BRENT_CG * deltax;
            }
        }

        let u = if rat.abs() < tol1 {
            if rat >= 0.0 {
                x + tol1
            } else {
                x - tol1
            }
        } else {
            x + rat
        };
        let fu = func(u)?;

        if fu > fx {
            if u < x {
                a = u;
            } else {
                b = u;
            }
            if fu <= fw || w == x {
                v = w;
                w = u;
                fv = fw;
                fw = fu;
            } else if fu <= fv || v == x || v == w {
                v = u;
                fv = fu;
            }
        } else {
            if u >= x {
                a = x;
            } else {
                b = x;
            }
            v = w;
            w = x;
            x = u;
            fv = fw;
            fw = fx;
            fx = fu;
        }
    }

    Some((x, fx))
}

/// Minimise along `dir` from `p`. Returns the new value, point and the
/// actual displacement taken.
fn line_search<F>(
    f: &mut Budgeted<F>,
    p: &DVector<f64>,
    dir: &DVector<f64>,
    fval: f64,
    tol: f64,
) -> Option<(f64, DVector<f64>, DVector<f64>)>
where
    F: FnMut(&DVector<f64>) -> f64,
{
    if dir.iter().all(|&d| d == 0.0) {
        return Some((fval, p.clone(), dir.clone()));
    }

    let mut along = |alpha: f64| f.eval(&(p + dir * alpha));
    let br = bracket(&mut along, 0.0, 1.0)?;
    let (alpha, fmin) = if br.is_valid() {
        brent(&mut along, &br, tol)?
    } else {
        br.best()
    };

    let step = dir * alpha;
    Some((fmin, p + &step, step))
}

/// Minimise `f` starting from `x0`.
pub fn minimize<F>(f: F, x0: DVector<f64>, options: PowellOptions) -> Minimum
where
    F: FnMut(&DVector<f64>) -> f64,
{
    let n = x0.len();
    let max_iter = options.max_iterations.unwrap_or(1000 * n.max(1));
    let max_fev = options.max_evaluations.unwrap_or(1000 * n.max(1));
    let line_tol = options.xtol * 100.0;

    let mut func = Budgeted { f, calls: 0, max_calls: max_fev };
    let mut directions: Vec<DVector<f64>> = (0..n)
        .map(|i| {
            let mut d = DVector::zeros(n);
            d[i] = 1.0;
            d
        })
        .collect();

    let mut x = x0;
    let Some(mut fval) = func.eval(&x) else {
        return Minimum { fun: f64::NAN, x, iterations: 0, evaluations: 0, converged: false };
    };
    let mut x1 = x.clone();
    let mut iterations = 0;
    let mut converged = false;

    'outer: loop {
        let fx = fval;
        let mut bigind = 0;
        let mut delta = 0.0;

        for (i, dir) in directions.iter().enumerate() {
            let fx2 = fval;
            let Some((fnew, xnew, _)) = line_search(&mut func, &x, dir, fval, line_tol) else {
                break 'outer;
            };
            fval = fnew;
            x = xnew;
            if fx2 - fval > delta {
                delta = fx2 - fval;
                bigind = i;
            }
        }
        iterations += 1;

        let bound = options.ftol * (fx.abs() + fval.abs()) + 1e-20;
        if 2.0 * (fx - fval) <= bound {
            converged = true;
            break;
        }
        if func.calls >= max_fev || iterations >= max_iter {
            break;
        }
        if fx.is_nan() && fval.is_nan() {
            break;
        }

        // Extrapolate along the net displacement of this sweep
        let direc1 = &x - &x1;
        x1 = x.clone();
        let x2 = &x + &direc1;
        let Some(fx2) = func.eval(&x2) else {
            break;
        };

        if fx > fx2 {
            let mut t = 2.0 * (fx + fx2 - 2.0 * fval);
            let temp = fx - fval - delta;
            t *= temp * temp;
            let temp = fx - fx2;
            t -= delta * temp * temp;
            if t < 0.0 {
                let Some((fnew, xnew, step)) = line_search(&mut func, &x, &direc1, fval, line_tol)
                else {
                    break;
                };
                fval = fnew;
                x = xnew;
                if step.iter().any(|&d| d != 0.0) {
                    directions[bigind] = directions[n - 1].clone();
                    directions[n - 1] = step;
                }
            }
        }
    }

    Minimum {
        x,
        fun: fval,
        iterations,
        evaluations: func.calls,
        converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadratic_bowl() {
        let target = DVector::from_vec(vec![1.5, -2.0, 0.25]);
        let t = target.clone();
        let result = minimize(
            move |x: &DVector<f64>| (x - &t).norm_squared(),
            DVector::zeros(3),
            PowellOptions::default(),
        );
        assert!(result.converged);
        assert!((&result.x - &target).norm() < 1e-3, "{:?}", result.x);
        assert!(result.fun < 1e-6);
    }

    #[test]
    fn test_rosenbrock() {
        let rosen = |x: &DVector<f64>| {
            let (a, b) = (x[0], x[1]);
            (1.0 - a).powi(2) + 100.0 * (b - a * a).powi(2)
        };
        let options = PowellOptions {
            xtol: 1e-6,
            ftol: 1e-8,
            ..PowellOptions::default()
        };
        let result = minimize(rosen, DVector::from_vec(vec![-1.2, 1.0]), options);
        assert!(result.converged);
        assert!((result.x[0] - 1.0).abs() < 1e-2, "{:?}", result.x);
        assert!((result.x[1] - 1.0).abs() < 2e-2, "{:?}", result.x);
    }

    #[test]
    fn test_flat_objective_stays_put() {
        let x0 = DVector::from_vec(vec![3.0, 4.0]);
        let result = minimize(|_: &DVector<f64>| 7.0, x0.clone(), PowellOptions::default());
        assert!(result.converged);
        assert_eq!(result.x, x0);
        assert_eq!(result.fun, 7.0);
    }

    #[test]
    fn test_iteration_cap_reports_not_converged() {
        let rosen = |x: &DVector<f64>| {
            let (a, b) = (x[0], x[1]);
            (1.0 - a).powi(2) + 100.0 * (b - a * a).powi(2)
        };
        let x0 = DVector::from_vec(vec![-1.2, 1.0]);
        let f0 = rosen(&x0);
        let options = PowellOptions {
            max_iterations: Some(1),
            ..PowellOptions::default()
        };
        let result = minimize(rosen, x0, options);
        assert_eq!(result.iterations, 1);
        assert!(!result.converged);
        assert!(result.fun < f0);
    }

    #[test]
    fn test_evaluation_cap_is_respected() {
        let options = PowellOptions {
            max_evaluations: Some(25),
            ..PowellOptions::default()
        };
        let result = minimize(
            |x: &DVector<f64>| x.iter().map(|v| (v - 3.0).powi(4)).sum(),
            DVector::zeros(6),
            options,
        );
        assert!(result.evaluations <= 25);
        assert!(!result.converged);
    }
}
